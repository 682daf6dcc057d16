use std::fmt::Write;

use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields},
    registry::LookupSpan,
};

/// Compact log lines: `WARN invoke{method=Main.run()V}: message`.
/// Only spans with recorded fields are printed, the rest are noise in interpreter logs.
pub(crate) struct Formatter;
impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        writer: &mut dyn Write,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let level = *event.metadata().level();
        write!(writer, "{:>5} ", level)?;

        let mut wrote_span = false;
        ctx.visit_spans(|span| {
            let ext = span.extensions();
            if let Some(fields) = ext.get::<FormattedFields<N>>() {
                if !fields.is_empty() {
                    if wrote_span {
                        writer.write_char(':')?;
                    }
                    write!(writer, "{}{{{}}}", span.name(), fields)?;
                    wrote_span = true;
                }
            }

            Ok(())
        })?;

        if wrote_span {
            writer.write_str(": ")?;
        }

        ctx.field_format().format_fields(writer, event)?;

        writeln!(writer)
    }
}
