//! System prompt (policy contract) for the math agent.

use std::fmt;
use std::str::FromStr;

/// Exact reply for questions that are not mathematical.
pub const OUT_OF_DOMAIN_RESPONSE: &str =
    "This question is outside my math context. Please ask a mathematical question.";

/// Exact reply the model is told to give when a tool call cannot be completed.
pub const TOOL_FAILURE_INSTRUCTION: &str =
    "Error: Unable to process this math query. Please rephrase (e.g., 'add 7 and 7').";

/// How one kind of phrasing is rewritten before calling a tool.
#[derive(Debug, Clone, Copy)]
pub struct NormalizationRule {
    /// Tool that computes the canonical form
    pub operation: &'static str,

    /// Accepted phrasings; the first one is the primary form
    pub phrasings: &'static [&'static str],

    /// Canonical infix or function syntax
    pub canonical: &'static str,
}

pub const NORMALIZATION_RULES: &[NormalizationRule] = &[
    NormalizationRule {
        operation: "add",
        phrasings: &["add 7 and 3"],
        canonical: "7 + 3",
    },
    NormalizationRule {
        operation: "subtract",
        phrasings: &["subtract 9 and 4", "9 minus 4"],
        canonical: "9 - 4",
    },
    NormalizationRule {
        operation: "multiply",
        phrasings: &["multiply 8 and 6", "8 times 6"],
        canonical: "8 * 6",
    },
    NormalizationRule {
        operation: "divide",
        phrasings: &["divide 10 and 5", "10 over 5"],
        canonical: "10 / 5",
    },
    NormalizationRule {
        operation: "power",
        phrasings: &["2 to the power of 3"],
        canonical: "2 ** 3",
    },
    NormalizationRule {
        operation: "sqrt",
        phrasings: &["sqrt 16", "square root of 16"],
        canonical: "sqrt(16)",
    },
    NormalizationRule {
        operation: "log",
        phrasings: &["log 10"],
        canonical: "log(10)",
    },
    NormalizationRule {
        operation: "sin",
        phrasings: &["sin 90"],
        canonical: "sin(90)",
    },
    NormalizationRule {
        operation: "cos",
        phrasings: &["cos 0"],
        canonical: "cos(0)",
    },
    NormalizationRule {
        operation: "tan",
        phrasings: &["tan 45"],
        canonical: "tan(45)",
    },
];

/// Few-shot query/answer pairs included verbatim in the prompt.
pub const WORKED_EXAMPLES: &[(&str, &str)] = &[
    ("add 7 and 3", "10"),
    ("8-8", "0"),
    ("divide 10 and 4", "2.5"),
    ("log 10", "1.0"),
    ("who is pm of India", OUT_OF_DOMAIN_RESPONSE),
];

/// Wording of the contract.
///
/// `V1` is the short rule set. `V2` additionally spells out the
/// minus/times/over/square-root synonyms and tightens the coercion and output
/// rules. Both encode the same invariants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PolicyVersion {
    V1,
    #[default]
    V2,
}

impl fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

impl FromStr for PolicyVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v1" | "1" => Ok(Self::V1),
            "v2" | "2" => Ok(Self::V2),
            other => Err(format!("expected v1 or v2, got: {}", other)),
        }
    }
}

/// The rendered instruction set. Built once, never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyContract {
    version: PolicyVersion,
    text: String,
}

impl PolicyContract {
    pub fn new(version: PolicyVersion) -> Self {
        Self {
            version,
            text: build_system_prompt(version),
        }
    }

    pub fn version(&self) -> PolicyVersion {
        self.version
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Default for PolicyContract {
    fn default() -> Self {
        Self::new(PolicyVersion::default())
    }
}

/// Render the system prompt for `version`.
pub fn build_system_prompt(version: PolicyVersion) -> String {
    let detailed = version == PolicyVersion::V2;

    let normalization = NORMALIZATION_RULES
        .iter()
        .map(|rule| {
            let phrasings = if detailed {
                rule.phrasings
            } else {
                &rule.phrasings[..1]
            };
            let lhs = phrasings
                .iter()
                .map(|p| format!("\"{}\"", p))
                .collect::<Vec<_>>()
                .join(" / ");
            format!("   - {} → \"{}\"", lhs, rule.canonical)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let examples = WORKED_EXAMPLES
        .iter()
        .map(|(query, answer)| {
            if answer.parse::<f64>().is_ok() {
                format!("   - \"{}\" → {}", query, answer)
            } else {
                format!("   - \"{}\" → \"{}\"", query, answer)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let no_mental_math = if detailed {
        "2. NEVER calculate mentally. Use MCP tools only.\n   - Every number in your answer must come from a tool result."
    } else {
        "2. NEVER calculate mentally. Use MCP tools only."
    };

    let coercion = if detailed {
        "4. Convert numbers to int/float before tools.\n   - Never pass a number to a tool as a string."
    } else {
        "4. Convert numbers to int/float before tools."
    };

    let output = if detailed {
        "5. OUTPUT:\n   - Always return only the numeric result.\n   - Integers → plain (e.g., 5), floats → decimal (e.g., 2.5).\n   - No explanations, no JSON, no tool-call text, no markup."
    } else {
        "5. OUTPUT:\n   - Always return only the numeric result.\n   - Integers → plain (e.g., 5), floats → decimal (e.g., 2.5)."
    };

    format!(
        r#"/no_think
You are a strict Math Agent that ONLY answers math questions using MCP math tools.

RULES (must always follow exactly):
1. Only answer MATHEMATICAL questions.
   - If the question is not math-related, reply exactly:
     "{out_of_domain}"

{no_mental_math}

3. Normalize input:
{normalization}

{coercion}

{output}

6. If tool fails →
   "{tool_failure}"

7. Examples:
{examples}
"#,
        out_of_domain = OUT_OF_DOMAIN_RESPONSE,
        tool_failure = TOOL_FAILURE_INSTRUCTION,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_versions_carry_the_fixed_strings() {
        for version in [PolicyVersion::V1, PolicyVersion::V2] {
            let text = build_system_prompt(version);
            assert!(text.contains(OUT_OF_DOMAIN_RESPONSE), "{}", version);
            assert!(text.contains(TOOL_FAILURE_INSTRUCTION), "{}", version);
            assert!(text.contains("NEVER calculate mentally"), "{}", version);
            assert!(text.starts_with("/no_think"));
        }
    }

    #[test]
    fn every_rule_is_rendered() {
        let text = build_system_prompt(PolicyVersion::V2);
        for rule in NORMALIZATION_RULES {
            assert!(text.contains(rule.canonical), "missing {}", rule.canonical);
            for phrasing in rule.phrasings {
                assert!(text.contains(phrasing), "missing {}", phrasing);
            }
        }
        assert!(text.contains(r#""subtract 9 and 4" / "9 minus 4" → "9 - 4""#));
    }

    #[test]
    fn v1_renders_only_primary_phrasings() {
        let text = build_system_prompt(PolicyVersion::V1);
        assert!(text.contains(r#""add 7 and 3" → "7 + 3""#));
        assert!(text.contains(r#""sqrt 16" → "sqrt(16)""#));
        assert!(!text.contains("9 minus 4"));
        assert!(!text.contains("8 times 6"));
        assert!(!text.contains("10 over 5"));
    }

    #[test]
    fn rules_cover_every_tool_operation() {
        let ops: Vec<&str> = NORMALIZATION_RULES.iter().map(|r| r.operation).collect();
        assert_eq!(
            ops,
            vec!["add", "subtract", "multiply", "divide", "power", "sqrt", "log", "sin", "cos", "tan"]
        );
    }

    #[test]
    fn worked_examples_are_verbatim() {
        let text = build_system_prompt(PolicyVersion::V2);
        assert!(text.contains(r#"- "add 7 and 3" → 10"#));
        assert!(text.contains(r#"- "8-8" → 0"#));
        assert!(text.contains(r#"- "divide 10 and 4" → 2.5"#));
        assert!(text.contains(r#"- "log 10" → 1.0"#));
        assert!(text.contains(&format!(r#"- "who is pm of India" → "{}""#, OUT_OF_DOMAIN_RESPONSE)));
    }

    #[test]
    fn contract_is_stable() {
        let a = PolicyContract::default();
        let b = PolicyContract::new(PolicyVersion::V2);
        assert_eq!(a, b);
        assert_eq!(a.version(), PolicyVersion::V2);
        assert_ne!(a.text(), PolicyContract::new(PolicyVersion::V1).text());
    }

    #[test]
    fn version_parsing() {
        assert_eq!("V1".parse::<PolicyVersion>().unwrap(), PolicyVersion::V1);
        assert_eq!(" 2 ".parse::<PolicyVersion>().unwrap(), PolicyVersion::V2);
        assert!("v3".parse::<PolicyVersion>().is_err());
        assert_eq!(PolicyVersion::V1.to_string(), "v1");
    }
}
