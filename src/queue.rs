//! Line-oriented queue input for the live command.
//!
//! Each non-blank line is the body of one queue message (a GitHub webhook
//! payload carrying its `X-GitHub-Event` and `X-GitHub-Delivery`). The
//! receipt time is stamped when the line is read.

use std::path::Path;

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};
use vossibility_core::live::QueueMessage;

pub type Input = Box<dyn AsyncBufRead + Unpin + Send>;

/// Open `path` for reading, `-` meaning standard input.
pub async fn open_input(path: &Path) -> io::Result<Input> {
    if path == Path::new("-") {
        info!("Reading queue messages from stdin");
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    info!(path = %path.display(), "Reading queue messages from file");
    let file = tokio::fs::File::open(path).await?;
    Ok(Box::new(BufReader::new(file)))
}

/// Forward every line of `input` as a queue message until the input ends or
/// the consumer goes away. Returns the number of messages forwarded.
pub async fn feed<R>(input: R, messages: mpsc::Sender<QueueMessage>) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut forwarded = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if messages.send(QueueMessage::received_now(line)).await.is_err() {
            debug!("Consumer stopped, no longer reading input");
            break;
        }
        forwarded += 1;
    }
    info!(forwarded, "Queue input exhausted");
    Ok(forwarded)
}
