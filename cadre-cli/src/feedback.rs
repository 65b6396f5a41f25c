//! Interactive feedback over stdin
//!
//! Renders the question, context digest, and options on stderr so stdout
//! stays clean for piped output, then reads one line from stdin.

use async_trait::async_trait;

use cadre_core::{FeedbackHandler, FeedbackRequest};

/// Feedback handler that prompts on the terminal
#[derive(Debug, Default)]
pub struct StdinFeedback;

impl StdinFeedback {
    pub fn new() -> Self {
        Self
    }

    fn render(request: &FeedbackRequest) -> String {
        let mut out = String::new();
        out.push_str(&format!("\n=== Input needed ({:?}) ===\n", request.kind));
        out.push_str(&format!("{}\n", request.question));
        if !request.context_digest.is_empty() {
            out.push_str(&format!("Context: {}\n", request.context_digest));
        }
        if !request.options.is_empty() {
            out.push_str(&format!("Options: {}\n", request.options.join(" | ")));
            out.push_str("(or type a free-text answer)\n");
        }
        if let Some(ref default) = request.default_option {
            out.push_str(&format!("[default on timeout: {default}]\n"));
        }
        out.push_str("> ");
        out
    }
}

#[async_trait]
impl FeedbackHandler for StdinFeedback {
    async fn request(&self, request: &FeedbackRequest) -> Option<String> {
        eprint!("{}", Self::render(request));
        let line = tokio::task::spawn_blocking(|| {
            let mut buffer = String::new();
            match std::io::stdin().read_line(&mut buffer) {
                Ok(0) => None,
                Ok(_) => Some(buffer.trim().to_string()),
                Err(_) => None,
            }
        })
        .await
        .ok()
        .flatten()?;
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}
