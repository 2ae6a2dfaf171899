use crate::server::context::{ClientContext, Outcome};

/// Logs one finished session on the `access` target.
pub fn record(ctx: &ClientContext, outcome: Outcome) {
    let status = ctx
        .status
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".to_string());
    let request = ctx.request_line();
    let elapsed_ms = ctx.started.elapsed().as_millis() as u64;

    tracing::info!(
        target: "access",
        client = %ctx.peer,
        request = %request,
        status = %status,
        bytes = ctx.bytes_out,
        elapsed_ms,
        outcome = outcome.as_str(),
        "{} \"{}\" {}",
        ctx.peer,
        request,
        status
    );
}
