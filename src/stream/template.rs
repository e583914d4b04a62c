//! Application command materializer
//!
//! Expands `$TOKEN$` references in a context's application template. A
//! backslash escapes the next character both inside and outside a token.
//! Unknown tokens are copied through with their markers, and a token left
//! open at the end of the template is closed implicitly.

use crate::constants::MAX_COMMAND_LEN;
use crate::error::TemplateError;
use crate::stream::context::StreamContext;

const MARKER: char = '$';
const ESCAPE: char = '\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Plain,
    Escape,
    Token,
    TokenEscape,
}

/// Value of a named token for this context, if the name is known
fn lookup(name: &str, ctx: &StreamContext) -> Option<String> {
    let switch = |on: bool| if on { "enable" } else { "disable" }.to_string();

    let value = match name {
        "MODE" => ctx.role.as_str().to_string(),
        "GPTP" => switch(ctx.clock_sync.is_some()),
        "SRP" => switch(ctx.reservation.is_some()),
        "AVDECC" => ctx
            .negotiation
            .as_ref()
            .map(|n| n.entity.clone())
            .unwrap_or_else(|| "disable".to_string()),
        "DEST_ADDR" => ctx.dest_addr.resolved().to_string(),
        "STREAM_ID" => ctx.stream_id.to_string(),
        "SR_CLASS" => ctx.sr_class.to_string(),
        "SR_PRIORITY" => ctx.sr_priority.to_string(),
        "VLAN_ID" => ctx.vlan_id.to_string(),
        "UNIQUE_ID" => ctx.unique_id.to_string(),
        "MAX_FRAMESIZE" => ctx.max_frame_size.to_string(),
        "FRAME_INTERVALS" => ctx.frame_intervals.to_string(),
        "LATENCY" => ctx.latency.to_string(),
        _ => return None,
    };

    Some(value)
}

fn close_token(out: &mut String, name: &str, ctx: &StreamContext, terminated: bool) {
    match lookup(name, ctx) {
        Some(value) => {
            tracing::trace!(stream = %ctx.name, "convert ${} to {}", name, value);
            out.push_str(&value);
        }
        None => {
            tracing::debug!(stream = %ctx.name, "{} is not a conversion word", name);
            out.push(MARKER);
            out.push_str(name);
            if terminated {
                out.push(MARKER);
            }
        }
    }
}

/// Expand `template` against `ctx`
pub fn materialize(template: &str, ctx: &StreamContext) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut name = String::new();
    let mut state = State::Plain;

    for c in template.chars() {
        state = match (state, c) {
            (State::Plain, ESCAPE) => State::Escape,
            (State::Plain, MARKER) => {
                name.clear();
                State::Token
            }
            (State::Plain, c) | (State::Escape, c) => {
                out.push(c);
                State::Plain
            }
            (State::Token, ESCAPE) => State::TokenEscape,
            (State::Token, MARKER) => {
                close_token(&mut out, &name, ctx, true);
                State::Plain
            }
            (State::Token, c) | (State::TokenEscape, c) => {
                name.push(c);
                State::Token
            }
        };

        if out.len() > MAX_COMMAND_LEN {
            return Err(TemplateError::TooLong {
                len: out.len(),
                limit: MAX_COMMAND_LEN,
            });
        }
    }

    if matches!(state, State::Token | State::TokenEscape) {
        close_token(&mut out, &name, ctx, false);
    }

    if out.len() > MAX_COMMAND_LEN {
        return Err(TemplateError::TooLong {
            len: out.len(),
            limit: MAX_COMMAND_LEN,
        });
    }

    Ok(out)
}

impl StreamContext {
    /// Materialize this context's application command
    pub fn application_command(&self) -> Result<String, TemplateError> {
        materialize(&self.application, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::context::DestAddr;
    use crate::testing::talker_context;
    use proptest::prelude::*;

    fn ctx() -> StreamContext {
        let mut ctx = talker_context("t.toml");
        ctx.dest_addr = DestAddr::Fixed("01:02:03:04:05:06".parse().unwrap());
        ctx
    }

    #[test]
    fn test_substitutes_tokens() {
        let out = materialize("run --addr=$DEST_ADDR$ --mode=$MODE$", &ctx()).unwrap();
        assert_eq!(out, "run --addr=01:02:03:04:05:06 --mode=talker");
    }

    #[test]
    fn test_numeric_and_switch_tokens() {
        let out = materialize(
            "$SR_CLASS$ $SR_PRIORITY$ $VLAN_ID$ $UNIQUE_ID$ $MAX_FRAMESIZE$ $FRAME_INTERVALS$ $LATENCY$ $GPTP$ $SRP$ $AVDECC$",
            &ctx(),
        )
        .unwrap();
        assert_eq!(out, "2 3 2 1 224 1 2000000 enable enable disable");
    }

    #[test]
    fn test_stream_id_token() {
        let mut ctx = ctx();
        ctx.attach_local_address("eth0", "00:11:22:33:44:55".parse().unwrap());
        let out = materialize("-s $STREAM_ID$", &ctx).unwrap();
        assert_eq!(out, "-s 00:11:22:33:44:55:00:01");
    }

    #[test]
    fn test_unknown_token_passes_through() {
        let out = materialize("echo $FOO$ done", &ctx()).unwrap();
        assert_eq!(out, "echo $FOO$ done");
    }

    #[test]
    fn test_escaped_markers_are_literal() {
        let out = materialize(r"\$LITERAL\$", &ctx()).unwrap();
        assert_eq!(out, "$LITERAL$");
    }

    #[test]
    fn test_escape_inside_token() {
        let out = materialize(r"$MO\DE$", &ctx()).unwrap();
        assert_eq!(out, "talker");

        let out = materialize(r"$A\$B$", &ctx()).unwrap();
        assert_eq!(out, "$A$B$");
    }

    #[test]
    fn test_unterminated_token_closes_at_end() {
        let out = materialize("run $PARTIAL", &ctx()).unwrap();
        assert_eq!(out, "run $PARTIAL");

        let out = materialize("run --mode=$MODE", &ctx()).unwrap();
        assert_eq!(out, "run --mode=talker");
    }

    #[test]
    fn test_trailing_backslash_is_dropped() {
        let out = materialize(r"run\", &ctx()).unwrap();
        assert_eq!(out, "run");
    }

    #[test]
    fn test_too_long() {
        let template = "$DEST_ADDR$".repeat(MAX_COMMAND_LEN / 10);
        let err = materialize(&template, &ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::TooLong { .. }));
    }

    proptest! {
        #[test]
        fn prop_plain_text_is_identity(s in "[^$\\\\]{0,200}") {
            prop_assert_eq!(materialize(&s, &ctx()).unwrap(), s);
        }

        #[test]
        fn prop_fully_escaped_text_is_literal(s in "[ -~]{0,200}") {
            let escaped: String = s.chars().flat_map(|c| ['\\', c]).collect();
            prop_assert_eq!(materialize(&escaped, &ctx()).unwrap(), s);
        }
    }
}
