//! Line-oriented interactive session around a [`MathAgent`].

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::agent::MathAgent;

pub const BANNER: &str = "Welcome! Enter your math query (type 'exit' to quit):";
pub const FAREWELL: &str = "Thank you for using the Math Agent!";
const EXIT_COMMAND: &str = "exit";

/// Answer one query per input line until `exit` or end of input.
///
/// Empty lines are skipped. Returns the number of queries answered.
pub async fn run_interactive<R, W>(
    agent: &MathAgent,
    input: R,
    mut output: W,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut answered = 0;

    output.write_all(format!("{}\n", BANNER).as_bytes()).await?;
    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case(EXIT_COMMAND) {
            output.write_all(format!("{}\n", FAREWELL).as_bytes()).await?;
            break;
        }

        output.write_all(b"Processing query...\n").await?;
        output.flush().await?;
        let response = agent.answer(query).await;
        answered += 1;

        output
            .write_all(format!("Q: {}\nA: {}\n\n", query, response).as_bytes())
            .await?;
    }

    output.flush().await?;
    Ok(answered)
}
