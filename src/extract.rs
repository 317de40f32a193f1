//! Extraction of the runnable shell block from an assistant reply.

use regex::Regex;
use std::sync::OnceLock;

fn shell_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?i:bash|sh|shell|zsh)[ \t]*\r?\n(.*?)\r?\n[ \t]*```")
            .expect("shell block pattern is valid")
    })
}

/// Returns the trimmed body of the first `bash`/`sh`/`shell`/`zsh` fenced
/// block, or an empty string when there is none.
pub fn extract_shell_block(response: &str) -> String {
    shell_block_regex()
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim().to_string())
        .unwrap_or_default()
}
