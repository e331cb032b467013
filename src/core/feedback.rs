// src/core/feedback.rs — Correction request sent after a failed evaluation

/// Fixed instruction closing every correction request.
pub const FIX_INSTRUCTION: &str = "Please fix the code. Remember: no variable declarations, \
no .play(), just a single Strudel expression.";

/// Build the user message asking the model to repair `code`, which failed
/// with `error`. Both are embedded byte-for-byte, even when they contain
/// fence markers of their own.
pub fn build_retry_message(code: &str, error: &str) -> String {
    let mut msg = String::with_capacity(code.len() + error.len() + 256);
    msg.push_str("The pattern you generated failed to evaluate with this error:\n```\n");
    msg.push_str(error);
    msg.push_str("\n```\nOriginal code:\n```strudel\n");
    msg.push_str(code);
    msg.push_str("\n```\n");
    msg.push_str(FIX_INSTRUCTION);
    msg
}
