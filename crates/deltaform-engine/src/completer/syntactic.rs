//! Phase S: syntactic closure.
//!
//! A single forward scan over the lexically-normalized fragment drives a
//! stack of open container frames. Mid-scan anomalies that strict JSON
//! rejects but streamed model output produces (trailing commas before a
//! closer, missing commas between members, bare object keys) are repaired
//! according to the strategy; at end of input the scanner repairs the
//! dangling construct in order of locality (unterminated string, then
//! partial primitive token, then dangling separator) and closes the frames
//! in stack order.
//!
//! Closing punctuation with no matching open frame, or any other
//! construct the scanner cannot classify, marks the outcome as corrupt:
//! the scan stops there, the suffix is dropped, and the prefix is still
//! closed so callers get the best partial document.

use deltaform_core::repair::{CompletionStrategy, RepairPhase, RepairStep};

/// Result of the closure pass.
pub(crate) struct SyntacticOutcome {
    pub text: String,
    pub steps: Vec<RepairStep>,
    /// Containers auto-closed at end of input, innermost first. The
    /// parser uses this to mark the still-open spine of a probed tree.
    pub closed_frames: usize,
    /// A structurally unrecoverable construct was dropped.
    pub corruption: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FrameKind {
    Object,
    Array,
}

/// Kind of the value that most recently completed inside a frame; used
/// by the Aggressive strategy to synthesize a matching typed default.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ValueHint {
    Number,
    String,
    Bool,
    Other,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    open_in: usize,
    open_out: usize,
    /// Offsets just past the last complete member/element, in input and
    /// output coordinates. `None` until the first item completes.
    last_item_end: Option<(usize, usize)>,
    /// A consumed separator comma awaiting its next item.
    pending_comma: Option<(usize, usize)>,
    last_item_hint: Option<ValueHint>,
}

impl Frame {
    fn new(kind: FrameKind, open_in: usize, open_out: usize) -> Self {
        Self {
            kind,
            open_in,
            open_out,
            last_item_end: None,
            pending_comma: None,
            last_item_hint: None,
        }
    }

    /// Output offset to truncate to when dropping the in-progress item.
    fn truncate_to(&self) -> usize {
        self.last_item_end
            .map(|(_, out)| out)
            .unwrap_or(self.open_out + 1)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Expect {
    /// A value may begin (top level, after `[`, after `,` in an array,
    /// after `:`).
    Value,
    /// Directly after `{`.
    ObjKeyOrEnd,
    /// After `,` inside an object.
    ObjKey,
    /// After a key string.
    ObjColon,
    ObjCommaOrEnd,
    ArrCommaOrEnd,
    /// The top-level value is complete.
    Done,
}

struct Scanner<'a> {
    input: &'a str,
    strategy: CompletionStrategy,
    out: String,
    steps: Vec<RepairStep>,
    frames: Vec<Frame>,
    expect: Expect,

    in_string: bool,
    string_is_key: bool,
    escape: bool,
    str_start_in: usize,
    /// Hex digits still owed by a `\u` escape in the current string.
    esc_u_remaining: u8,
    /// Output offset of the backslash of the escape in progress.
    esc_start_out: usize,

    in_token: bool,
    token: String,
    token_start_in: usize,
    token_start_out: usize,

    bare_key: bool,
    bare_key_start_in: usize,

    corruption: bool,
}

pub(crate) fn close(input: &str, strategy: CompletionStrategy) -> SyntacticOutcome {
    let mut scanner = Scanner {
        input,
        strategy,
        out: String::with_capacity(input.len() + 8),
        steps: Vec::new(),
        frames: Vec::new(),
        expect: Expect::Value,
        in_string: false,
        string_is_key: false,
        escape: false,
        str_start_in: 0,
        esc_u_remaining: 0,
        esc_start_out: 0,
        in_token: false,
        token: String::new(),
        token_start_in: 0,
        token_start_out: 0,
        bare_key: false,
        bare_key_start_in: 0,
        corruption: false,
    };
    scanner.scan();
    scanner.finish()
}

impl Scanner<'_> {
    fn scan(&mut self) {
        let chars: Vec<(usize, char)> = self.input.char_indices().collect();
        let mut idx = 0;
        while idx < chars.len() {
            let (pos, ch) = chars[idx];
            if self.in_string {
                self.out.push(ch);
                if self.escape {
                    self.escape = false;
                    if ch == 'u' {
                        self.esc_u_remaining = 4;
                    }
                } else if self.esc_u_remaining > 0 && ch.is_ascii_hexdigit() {
                    self.esc_u_remaining -= 1;
                } else {
                    self.esc_u_remaining = 0;
                    if ch == '\\' {
                        self.escape = true;
                        self.esc_start_out = self.out.len() - 1;
                    } else if ch == '"' {
                        self.in_string = false;
                        self.end_string(pos + 1);
                    }
                }
                idx += 1;
                continue;
            }
            if self.bare_key {
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    self.out.push(ch);
                    idx += 1;
                    continue;
                }
                self.out.push('"');
                self.bare_key = false;
                self.steps.push(RepairStep::new(
                    RepairPhase::Syntactic,
                    "quote-key",
                    "quoted a bare object key",
                    self.bare_key_start_in..pos,
                    0.5,
                ));
                self.expect = Expect::ObjColon;
                // Fall through: re-dispatch this character.
                continue;
            }
            if self.in_token {
                if ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.') {
                    self.token.push(ch);
                    self.out.push(ch);
                    idx += 1;
                    continue;
                }
                self.finish_token(pos);
                if self.corruption {
                    return;
                }
                // Fall through: re-dispatch this character.
                continue;
            }
            if ch.is_whitespace() {
                self.out.push(ch);
                idx += 1;
                continue;
            }
            self.dispatch(pos, ch);
            if self.corruption {
                return;
            }
            idx += 1;
        }
    }

    fn dispatch(&mut self, pos: usize, ch: char) {
        match ch {
            '{' if self.expect == Expect::Value => {
                self.frames
                    .push(Frame::new(FrameKind::Object, pos, self.out.len()));
                self.out.push('{');
                self.expect = Expect::ObjKeyOrEnd;
            }
            '[' if self.expect == Expect::Value => {
                self.frames
                    .push(Frame::new(FrameKind::Array, pos, self.out.len()));
                self.out.push('[');
                self.expect = Expect::Value;
            }
            '}' => self.close_object(pos),
            ']' => self.close_array(pos),
            ',' => match self.expect {
                Expect::ObjCommaOrEnd => {
                    self.out.push(',');
                    if let Some(f) = self.frames.last_mut() {
                        f.pending_comma = Some((pos, self.out.len() - 1));
                    }
                    self.expect = Expect::ObjKey;
                }
                Expect::ArrCommaOrEnd => {
                    self.out.push(',');
                    if let Some(f) = self.frames.last_mut() {
                        f.pending_comma = Some((pos, self.out.len() - 1));
                    }
                    self.expect = Expect::Value;
                }
                _ => self.corrupt(pos, ch),
            },
            ':' if self.expect == Expect::ObjColon => {
                self.out.push(':');
                self.expect = Expect::Value;
            }
            '"' => match self.expect {
                Expect::ObjKeyOrEnd | Expect::ObjKey => {
                    self.in_string = true;
                    self.string_is_key = true;
                    self.escape = false;
                    self.str_start_in = pos;
                    self.out.push('"');
                }
                Expect::Value => {
                    self.in_string = true;
                    self.string_is_key = false;
                    self.escape = false;
                    self.str_start_in = pos;
                    self.out.push('"');
                }
                Expect::ObjCommaOrEnd | Expect::ArrCommaOrEnd
                    if self.strategy != CompletionStrategy::Conservative =>
                {
                    self.insert_missing_comma(pos);
                    // Re-dispatch as the start of the next key/value.
                    self.dispatch(pos, '"');
                }
                _ => self.corrupt(pos, ch),
            },
            c if c.is_ascii_alphanumeric() || c == '-' => match self.expect {
                Expect::Value => {
                    self.in_token = true;
                    self.token.clear();
                    self.token.push(c);
                    self.token_start_in = pos;
                    self.token_start_out = self.out.len();
                    self.out.push(c);
                }
                Expect::ArrCommaOrEnd if self.strategy != CompletionStrategy::Conservative => {
                    self.insert_missing_comma(pos);
                    self.dispatch(pos, c);
                }
                Expect::ObjKeyOrEnd | Expect::ObjKey
                    if self.strategy == CompletionStrategy::Aggressive
                        && (c.is_ascii_alphabetic() || c == '_') =>
                {
                    self.bare_key = true;
                    self.bare_key_start_in = pos;
                    self.out.push('"');
                    self.out.push(c);
                }
                _ => self.corrupt(pos, ch),
            },
            _ => self.corrupt(pos, ch),
        }
    }

    fn insert_missing_comma(&mut self, pos: usize) {
        self.out.push(',');
        if let Some(f) = self.frames.last_mut() {
            f.pending_comma = Some((pos, self.out.len() - 1));
        }
        self.steps.push(RepairStep::new(
            RepairPhase::Syntactic,
            "insert-comma",
            "inserted a missing separator comma",
            pos..pos,
            0.6,
        ));
        self.expect = match self.expect {
            Expect::ObjCommaOrEnd => Expect::ObjKey,
            _ => Expect::Value,
        };
    }

    fn close_object(&mut self, pos: usize) {
        if !self.top_is(FrameKind::Object) {
            self.corrupt(pos, '}');
            return;
        }
        match self.expect {
            Expect::ObjKeyOrEnd | Expect::ObjCommaOrEnd => {}
            Expect::ObjKey => {
                // `{"a": 1,}`: drop the trailing comma.
                self.remove_pending_comma();
            }
            Expect::Value => {
                // `{"a":}`: the member has a colon but no value.
                self.repair_missing_member_value(pos);
            }
            _ => {
                self.corrupt(pos, '}');
                return;
            }
        }
        self.out.push('}');
        let frame = self.frames.pop();
        debug_assert!(frame.is_some());
        self.value_done(pos + 1, ValueHint::Other);
    }

    fn close_array(&mut self, pos: usize) {
        if !self.top_is(FrameKind::Array) {
            self.corrupt(pos, ']');
            return;
        }
        match self.expect {
            Expect::ArrCommaOrEnd => {}
            Expect::Value => {
                let pending = self.frames.last().and_then(|f| f.pending_comma);
                if pending.is_some() {
                    // `[1, ]`: drop the trailing comma.
                    self.remove_pending_comma();
                }
                // Otherwise `[]`, which is fine.
            }
            _ => {
                self.corrupt(pos, ']');
                return;
            }
        }
        self.out.push(']');
        let frame = self.frames.pop();
        debug_assert!(frame.is_some());
        self.value_done(pos + 1, ValueHint::Other);
    }

    fn remove_pending_comma(&mut self) {
        if let Some(f) = self.frames.last_mut() {
            if let Some((comma_in, comma_out)) = f.pending_comma.take() {
                let _ = self.out.remove(comma_out);
                self.steps.push(RepairStep::new(
                    RepairPhase::Syntactic,
                    "remove-trailing-comma",
                    "removed a trailing separator comma",
                    comma_in..comma_in + 1,
                    0.85,
                ));
            }
        }
    }

    /// `{"a":}` or `{"a":` followed by the closer: resolve the member
    /// that has a colon but no value.
    fn repair_missing_member_value(&mut self, pos: usize) {
        match self.strategy {
            CompletionStrategy::Smart => {
                self.out.push_str("null");
                self.steps.push(RepairStep::new(
                    RepairPhase::Syntactic,
                    "complete-value-null",
                    "completed a dangling member with null",
                    pos..pos,
                    0.7,
                ));
            }
            CompletionStrategy::Aggressive => {
                self.out.push_str("\"\"");
                self.steps.push(RepairStep::new(
                    RepairPhase::Syntactic,
                    "synthesize-default",
                    "synthesized a default value for a dangling member",
                    pos..pos,
                    0.5,
                ));
            }
            CompletionStrategy::Conservative => {
                let trunc = self
                    .frames
                    .last()
                    .map(|f| f.truncate_to())
                    .unwrap_or(self.out.len());
                self.out.truncate(trunc);
                self.steps.push(RepairStep::new(
                    RepairPhase::Syntactic,
                    "drop-partial-member",
                    "dropped a member with no value",
                    pos..pos,
                    0.7,
                ));
            }
        }
    }

    fn corrupt(&mut self, pos: usize, ch: char) {
        self.corruption = true;
        self.steps.push(RepairStep::new(
            RepairPhase::Syntactic,
            "drop-corrupt-suffix",
            format!("dropped unparseable suffix starting at {ch:?}"),
            pos..self.input.len(),
            0.2,
        ));
    }

    fn top_is(&self, kind: FrameKind) -> bool {
        self.frames.last().map(|f| f.kind) == Some(kind)
    }

    fn end_string(&mut self, end_in: usize) {
        if self.string_is_key {
            self.string_is_key = false;
            self.expect = Expect::ObjColon;
        } else {
            self.value_done(end_in, ValueHint::String);
        }
    }

    fn value_done(&mut self, end_in: usize, hint: ValueHint) {
        let end_out = self.out.len();
        match self.frames.last_mut() {
            None => self.expect = Expect::Done,
            Some(f) => {
                f.last_item_end = Some((end_in, end_out));
                f.pending_comma = None;
                f.last_item_hint = Some(hint);
                self.expect = match f.kind {
                    FrameKind::Object => Expect::ObjCommaOrEnd,
                    FrameKind::Array => Expect::ArrCommaOrEnd,
                };
            }
        }
    }

    fn finish_token(&mut self, end_in: usize) {
        let token = std::mem::take(&mut self.token);
        self.in_token = false;
        match classify_token(&token) {
            TokenClass::Complete(hint) => self.value_done(end_in, hint),
            _ => {
                // A malformed literal in the middle of the document, e.g.
                // `{"a": trux, ...}`.
                self.corruption = true;
                self.steps.push(RepairStep::new(
                    RepairPhase::Syntactic,
                    "drop-corrupt-suffix",
                    format!("dropped invalid literal {token:?}"),
                    self.token_start_in..self.input.len(),
                    0.2,
                ));
                self.out.truncate(self.token_start_out);
                let trunc = self
                    .frames
                    .last()
                    .map(|f| f.truncate_to())
                    .unwrap_or(self.out.len());
                self.out.truncate(trunc.min(self.out.len()));
            }
        }
    }

    /// End-of-input repair: most local construct first, then close the
    /// remaining frames in stack order.
    fn finish(mut self) -> SyntacticOutcome {
        let eof = self.input.len();

        if self.corruption {
            // The dangling construct ended in dropped garbage; never
            // fabricate a value for it.
            self.strategy = CompletionStrategy::Conservative;
        }

        if self.in_string {
            self.repair_eof_string(eof);
        } else if self.in_token {
            self.repair_eof_token(eof);
        } else if self.bare_key {
            self.out.push('"');
            self.steps.push(RepairStep::new(
                RepairPhase::Syntactic,
                "quote-key",
                "quoted a bare object key",
                self.bare_key_start_in..eof,
                0.5,
            ));
            self.bare_key = false;
            self.expect = Expect::ObjColon;
        }

        self.repair_eof_separator(eof);

        let mut closed_frames = 0;
        while let Some(frame) = self.frames.pop() {
            match frame.kind {
                FrameKind::Array => {
                    self.out.push(']');
                    self.steps.push(RepairStep::new(
                        RepairPhase::Syntactic,
                        "close-array",
                        "closed an open array",
                        eof..eof,
                        0.9,
                    ));
                }
                FrameKind::Object => {
                    self.out.push('}');
                    self.steps.push(RepairStep::new(
                        RepairPhase::Syntactic,
                        "close-object",
                        "closed an open object",
                        eof..eof,
                        0.9,
                    ));
                }
            }
            closed_frames += 1;
        }

        SyntacticOutcome {
            text: self.out,
            steps: self.steps,
            closed_frames,
            corruption: self.corruption,
        }
    }

    fn repair_eof_string(&mut self, eof: usize) {
        // Confidence tracks how recently the opening quote was seen.
        let confidence = if eof.saturating_sub(self.str_start_in) <= 24 {
            0.85
        } else {
            0.7
        };
        self.in_string = false;
        // A dangling `\` or partial `\uXXXX` cannot survive the closing
        // quote; strip it first.
        if self.escape {
            let _ = self.out.pop();
            self.escape = false;
            self.steps.push(RepairStep::new(
                RepairPhase::Syntactic,
                "trim-escape",
                "stripped an incomplete escape sequence",
                eof.saturating_sub(1)..eof,
                0.7,
            ));
        } else if self.esc_u_remaining > 0 {
            let removed = self.out.len() - self.esc_start_out;
            self.out.truncate(self.esc_start_out);
            self.esc_u_remaining = 0;
            self.steps.push(RepairStep::new(
                RepairPhase::Syntactic,
                "trim-escape",
                "stripped an incomplete unicode escape",
                eof.saturating_sub(removed)..eof,
                0.7,
            ));
        }
        if self.string_is_key {
            self.string_is_key = false;
            if self.strategy == CompletionStrategy::Aggressive {
                self.out.push('"');
                self.steps.push(RepairStep::new(
                    RepairPhase::Syntactic,
                    "close-string",
                    "closed an unterminated key",
                    self.str_start_in..eof,
                    confidence,
                ));
                self.out.push_str(": null");
                self.steps.push(RepairStep::new(
                    RepairPhase::Syntactic,
                    "complete-key-null",
                    "completed a partial key with a null value",
                    eof..eof,
                    0.5,
                ));
                self.value_done(eof, ValueHint::Other);
            } else {
                self.drop_partial_item(eof, "drop-partial-key", "dropped a partial object key");
            }
        } else {
            self.out.push('"');
            self.steps.push(RepairStep::new(
                RepairPhase::Syntactic,
                "close-string",
                "closed an unterminated string",
                self.str_start_in..eof,
                confidence,
            ));
            self.value_done(eof, ValueHint::String);
        }
    }

    fn repair_eof_token(&mut self, eof: usize) {
        let token = std::mem::take(&mut self.token);
        self.in_token = false;
        match classify_token(&token) {
            TokenClass::Complete(hint) => {
                self.value_done(eof, hint);
                return;
            }
            TokenClass::LiteralPrefix(full) => match self.strategy {
                CompletionStrategy::Conservative => self.replace_token_with_null(eof),
                _ => {
                    self.out.push_str(&full[token.len()..]);
                    self.steps.push(RepairStep::new(
                        RepairPhase::Syntactic,
                        "complete-literal",
                        format!("completed {token:?} to {full:?}"),
                        self.token_start_in..eof,
                        0.8,
                    ));
                    let hint = if full == "null" {
                        ValueHint::Other
                    } else {
                        ValueHint::Bool
                    };
                    self.value_done(eof, hint);
                }
            },
            TokenClass::NumberFragment => match self.strategy {
                CompletionStrategy::Conservative => self.replace_token_with_null(eof),
                CompletionStrategy::Smart => {
                    let trimmed = token.trim_end_matches(['.', 'e', 'E', '+', '-']);
                    if !trimmed.is_empty() && is_valid_number(trimmed) {
                        self.out.truncate(self.token_start_out);
                        self.out.push_str(trimmed);
                        self.steps.push(RepairStep::new(
                            RepairPhase::Syntactic,
                            "trim-number",
                            format!("trimmed numeric fragment {token:?} to {trimmed:?}"),
                            self.token_start_in..eof,
                            0.75,
                        ));
                        self.value_done(eof, ValueHint::Number);
                    } else {
                        self.replace_token_with_null(eof);
                    }
                }
                CompletionStrategy::Aggressive => match extend_number(&token) {
                    Some(extended) => {
                        self.out.push_str(&extended[token.len()..]);
                        self.steps.push(RepairStep::new(
                            RepairPhase::Syntactic,
                            "extend-number",
                            format!("extended numeric fragment {token:?} to {extended:?}"),
                            self.token_start_in..eof,
                            0.5,
                        ));
                        self.value_done(eof, ValueHint::Number);
                    }
                    None => self.replace_token_with_null(eof),
                },
            },
            TokenClass::Unknown => self.replace_token_with_null(eof),
        }
    }

    fn replace_token_with_null(&mut self, eof: usize) {
        self.out.truncate(self.token_start_out);
        self.out.push_str("null");
        self.steps.push(RepairStep::new(
            RepairPhase::Syntactic,
            "replace-with-null",
            "replaced an unfinishable token with null",
            self.token_start_in..eof,
            0.6,
        ));
        self.value_done(eof, ValueHint::Other);
    }

    fn drop_partial_item(&mut self, eof: usize, op: &str, description: &str) {
        let (trunc, had_item) = match self.frames.last() {
            Some(f) => (f.truncate_to(), f.last_item_end.is_some()),
            None => (0, false),
        };
        self.out.truncate(trunc);
        self.steps.push(RepairStep::new(
            RepairPhase::Syntactic,
            op,
            description,
            self.str_start_in.min(eof)..eof,
            0.7,
        ));
        self.expect = match self.frames.last().map(|f| f.kind) {
            Some(FrameKind::Object) if had_item => Expect::ObjCommaOrEnd,
            Some(FrameKind::Object) => Expect::ObjKeyOrEnd,
            Some(FrameKind::Array) if had_item => Expect::ArrCommaOrEnd,
            Some(FrameKind::Array) => Expect::Value,
            None => Expect::Value,
        };
        if let Some(f) = self.frames.last_mut() {
            f.pending_comma = None;
        }
    }

    fn repair_eof_separator(&mut self, eof: usize) {
        match self.expect {
            // A complete key with no colon behaves like a partial member:
            // only Aggressive invents the rest.
            Expect::ObjColon => {
                if self.strategy == CompletionStrategy::Aggressive {
                    self.out.push_str(": null");
                    self.steps.push(RepairStep::new(
                        RepairPhase::Syntactic,
                        "complete-key-null",
                        "completed a dangling key with a null value",
                        eof..eof,
                        0.5,
                    ));
                    self.value_done(eof, ValueHint::Other);
                } else {
                    self.drop_partial_item(
                        eof,
                        "drop-partial-member",
                        "dropped a key with no value",
                    );
                }
            }
            Expect::Value => match self.frames.last().map(|f| f.kind) {
                Some(FrameKind::Object) => {
                    // `{"a":`, a colon with no value.
                    match self.strategy {
                        CompletionStrategy::Smart => {
                            self.out.push_str(" null");
                            self.steps.push(RepairStep::new(
                                RepairPhase::Syntactic,
                                "complete-value-null",
                                "completed a dangling member with null",
                                eof..eof,
                                0.7,
                            ));
                            self.value_done(eof, ValueHint::Other);
                        }
                        CompletionStrategy::Aggressive => {
                            self.out.push_str(" \"\"");
                            self.steps.push(RepairStep::new(
                                RepairPhase::Syntactic,
                                "synthesize-default",
                                "synthesized a default value for a dangling member",
                                eof..eof,
                                0.5,
                            ));
                            self.value_done(eof, ValueHint::String);
                        }
                        CompletionStrategy::Conservative => {
                            self.drop_partial_item(
                                eof,
                                "drop-partial-member",
                                "dropped a member with no value",
                            );
                        }
                    }
                }
                Some(FrameKind::Array) => {
                    let pending = self.frames.last().and_then(|f| f.pending_comma);
                    if let Some((comma_in, comma_out)) = pending {
                        // `[1,`, a dangling element separator.
                        match self.strategy {
                            CompletionStrategy::Smart => {
                                self.out.push_str("null");
                                self.steps.push(RepairStep::new(
                                    RepairPhase::Syntactic,
                                    "complete-value-null",
                                    "completed a dangling element with null",
                                    eof..eof,
                                    0.7,
                                ));
                                self.value_done(eof, ValueHint::Other);
                            }
                            CompletionStrategy::Conservative => {
                                let _ = self.out.remove(comma_out);
                                self.steps.push(RepairStep::new(
                                    RepairPhase::Syntactic,
                                    "remove-trailing-comma",
                                    "removed a trailing separator comma",
                                    comma_in..comma_in + 1,
                                    0.85,
                                ));
                                if let Some(f) = self.frames.last_mut() {
                                    f.pending_comma = None;
                                }
                                self.expect = Expect::ArrCommaOrEnd;
                            }
                            CompletionStrategy::Aggressive => {
                                let hint = self
                                    .frames
                                    .last()
                                    .and_then(|f| f.last_item_hint)
                                    .unwrap_or(ValueHint::Other);
                                let default = match hint {
                                    ValueHint::Number => "0",
                                    ValueHint::String => "\"\"",
                                    ValueHint::Bool => "false",
                                    ValueHint::Other => "null",
                                };
                                self.out.push_str(default);
                                self.steps.push(RepairStep::new(
                                    RepairPhase::Syntactic,
                                    "synthesize-default",
                                    format!("synthesized default {default} for a dangling element"),
                                    eof..eof,
                                    0.5,
                                ));
                                self.value_done(eof, hint);
                            }
                        }
                    }
                    // Directly after `[`: closes as an empty array.
                }
                None => {}
            },
            // `{"a": 1,`, a dangling member separator: removal is the
            // only legal completion for every strategy (there is no key
            // to attach a value to).
            Expect::ObjKey => {
                let pending = self.frames.last_mut().and_then(|f| f.pending_comma.take());
                if let Some((comma_in, comma_out)) = pending {
                    let _ = self.out.remove(comma_out);
                    self.steps.push(RepairStep::new(
                        RepairPhase::Syntactic,
                        "remove-trailing-comma",
                        "removed a trailing separator comma",
                        comma_in..comma_in + 1,
                        0.85,
                    ));
                }
                self.expect = Expect::ObjCommaOrEnd;
            }
            _ => {}
        }
    }
}

enum TokenClass {
    Complete(ValueHint),
    LiteralPrefix(&'static str),
    NumberFragment,
    Unknown,
}

fn classify_token(token: &str) -> TokenClass {
    match token {
        "true" | "false" => return TokenClass::Complete(ValueHint::Bool),
        "null" => return TokenClass::Complete(ValueHint::Other),
        _ => {}
    }
    if is_valid_number(token) {
        return TokenClass::Complete(ValueHint::Number);
    }
    for literal in ["true", "false", "null"] {
        if literal.starts_with(token) {
            return TokenClass::LiteralPrefix(literal);
        }
    }
    let mut bytes = token.bytes();
    match bytes.next() {
        Some(b'-') | Some(b'0'..=b'9') => TokenClass::NumberFragment,
        _ => TokenClass::Unknown,
    }
}

/// Strict JSON number grammar: `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`.
fn is_valid_number(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    if b.first() == Some(&b'-') {
        i += 1;
    }
    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let int_len = i - int_start;
    if int_len == 0 || (int_len > 1 && b[int_start] == b'0') {
        return false;
    }
    if i < b.len() && b[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == frac_start {
            return false;
        }
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        i += 1;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == b.len()
}

/// Aggressively extend a numeric fragment into a valid number.
fn extend_number(token: &str) -> Option<String> {
    let mut candidate = token.to_string();
    for _ in 0..2 {
        if is_valid_number(&candidate) {
            return Some(candidate);
        }
        match candidate.as_bytes().last()? {
            b'.' | b'e' | b'E' | b'+' | b'-' => candidate.push('0'),
            _ => return None,
        }
    }
    if is_valid_number(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CompletionStrategy::{Aggressive, Conservative, Smart};

    fn closed(input: &str, strategy: CompletionStrategy) -> String {
        close(input, strategy).text
    }

    #[test]
    fn truncated_object_closes() {
        let out = close(r#"{"name": "Alice", "age": 25"#, Smart);
        assert_eq!(out.text, r#"{"name": "Alice", "age": 25}"#);
        assert_eq!(out.steps.len(), 1);
        assert_eq!(out.steps[0].op, "close-object");
        assert_eq!(out.closed_frames, 1);
        assert!(!out.corruption);
    }

    #[test]
    fn nested_frames_close_in_stack_order() {
        let out = close(r#"{"users": [{"id": 1"#, Smart);
        assert_eq!(out.text, r#"{"users": [{"id": 1}]}"#);
        let ops: Vec<&str> = out.steps.iter().map(|s| s.op.as_str()).collect();
        assert_eq!(ops, vec!["close-object", "close-array", "close-object"]);
        assert_eq!(out.closed_frames, 3);
    }

    #[test]
    fn unterminated_value_string_closes() {
        let out = close(r#"{"name": "Ali"#, Smart);
        assert_eq!(out.text, r#"{"name": "Ali"}"#);
        assert_eq!(out.steps[0].op, "close-string");
        assert!(out.steps[0].confidence >= 0.7);
    }

    #[test]
    fn partial_key_dropped_unless_aggressive() {
        let input = r#"{"name": "Alice", "ag"#;
        assert_eq!(closed(input, Smart), r#"{"name": "Alice"}"#);
        assert_eq!(closed(input, Conservative), r#"{"name": "Alice"}"#);
        assert_eq!(closed(input, Aggressive), r#"{"name": "Alice", "ag": null}"#);
    }

    #[test]
    fn partial_first_key_leaves_empty_object() {
        assert_eq!(closed(r#"{"na"#, Smart), "{}");
        assert_eq!(closed(r#"{"na"#, Aggressive), r#"{"na": null}"#);
    }

    #[test]
    fn literal_prefix_completion() {
        assert_eq!(closed(r#"{"ok": tru"#, Smart), r#"{"ok": true}"#);
        assert_eq!(closed(r#"{"ok": fal"#, Smart), r#"{"ok": false}"#);
        assert_eq!(closed(r#"{"ok": nu"#, Smart), r#"{"ok": null}"#);
        assert_eq!(closed(r#"{"ok": tru"#, Conservative), r#"{"ok": null}"#);
    }

    #[test]
    fn numeric_fragment_by_strategy() {
        assert_eq!(closed(r#"{"n": 12."#, Smart), r#"{"n": 12}"#);
        assert_eq!(closed(r#"{"n": 12."#, Conservative), r#"{"n": null}"#);
        assert_eq!(closed(r#"{"n": 12."#, Aggressive), r#"{"n": 12.0}"#);
        assert_eq!(closed(r#"{"n": 1e"#, Aggressive), r#"{"n": 1e0}"#);
    }

    #[test]
    fn complete_number_needs_no_step() {
        let out = close(r#"{"age": 25"#, Smart);
        assert_eq!(out.text, r#"{"age": 25}"#);
        assert_eq!(out.steps.len(), 1); // close-object only
    }

    #[test]
    fn dangling_colon_by_strategy() {
        assert_eq!(closed(r#"{"a":"#, Smart), r#"{"a": null}"#);
        assert_eq!(closed(r#"{"a":"#, Conservative), "{}");
        assert_eq!(closed(r#"{"a":"#, Aggressive), r#"{"a": ""}"#);
    }

    #[test]
    fn dangling_object_comma_removed() {
        for strategy in [Smart, Conservative, Aggressive] {
            assert_eq!(closed(r#"{"a": 1,"#, strategy), r#"{"a": 1}"#);
        }
    }

    #[test]
    fn dangling_array_comma_by_strategy() {
        assert_eq!(closed("[1, 2,", Smart), "[1, 2,null]");
        assert_eq!(closed("[1, 2,", Conservative), "[1, 2]");
        assert_eq!(closed("[1, 2,", Aggressive), "[1, 2,0]");
        assert_eq!(closed(r#"["a","#, Aggressive), r#"["a",""]"#);
    }

    #[test]
    fn interior_trailing_comma_removed() {
        let out = close(r#"{"a": [1, 2,], "b": 3,}"#, Smart);
        assert_eq!(out.text, r#"{"a": [1, 2], "b": 3}"#);
        assert_eq!(
            out.steps
                .iter()
                .filter(|s| s.op == "remove-trailing-comma")
                .count(),
            2
        );
        assert!(!out.corruption);
    }

    #[test]
    fn missing_comma_inserted_for_smart() {
        let out = close(r#"{"a": 1 "b": 2}"#, Smart);
        assert_eq!(out.text, r#"{"a": 1 ,"b": 2}"#);
        assert!(out.steps.iter().any(|s| s.op == "insert-comma"));

        let out = close(r#"{"a": 1 "b": 2}"#, Conservative);
        assert!(out.corruption);
    }

    #[test]
    fn bare_key_quoted_for_aggressive_only() {
        let out = close(r#"{name: "x"}"#, Aggressive);
        assert_eq!(out.text, r#"{"name": "x"}"#);
        assert!(out.steps.iter().any(|s| s.op == "quote-key"));

        assert!(close(r#"{name: "x"}"#, Smart).corruption);
    }

    #[test]
    fn unmatched_closer_is_corruption() {
        let out = close(r#"{"a": 1}]"#, Smart);
        assert!(out.corruption);
        assert_eq!(out.text, r#"{"a": 1}"#);
    }

    #[test]
    fn corruption_still_closes_prefix() {
        let out = close(r#"{"a": ]"#, Smart);
        assert!(out.corruption);
        assert_eq!(out.text, "{}");
    }

    #[test]
    fn invalid_interior_literal_is_corruption() {
        let out = close(r#"{"a": trux, "b": 1}"#, Smart);
        assert!(out.corruption);
        assert_eq!(out.text, "{}");
    }

    #[test]
    fn empty_containers() {
        assert_eq!(closed("[", Smart), "[]");
        assert_eq!(closed("{", Smart), "{}");
        assert_eq!(closed("[[", Smart), "[[]]");
    }

    #[test]
    fn top_level_scalar_fragments() {
        assert_eq!(closed("tru", Smart), "true");
        assert_eq!(closed(r#""hel"#, Smart), r#""hel""#);
        assert_eq!(closed("-", Aggressive), "-0");
    }

    #[test]
    fn incomplete_escape_stripped_before_close() {
        assert_eq!(closed("{\"a\": \"x\\", Smart), r#"{"a": "x"}"#);
        assert_eq!(closed("{\"a\": \"x\\u00", Smart), r#"{"a": "x"}"#);
        // A complete escape survives.
        assert_eq!(closed("{\"a\": \"x\\n", Smart), "{\"a\": \"x\\n\"}");
        assert_eq!(closed("{\"a\": \"x\\u00e9", Smart), "{\"a\": \"x\\u00e9\"}");
    }

    #[test]
    fn number_grammar() {
        for ok in ["0", "-1", "12", "1.5", "0.25", "1e3", "1E-2", "-1.5e+10"] {
            assert!(is_valid_number(ok), "{ok}");
        }
        for bad in ["", "-", "01", "1.", ".5", "1e", "1e+", "+1", "1.2.3"] {
            assert!(!is_valid_number(bad), "{bad}");
        }
    }
}
