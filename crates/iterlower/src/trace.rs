//! Lowering-pass tracing infrastructure.
//!
//! Mirrors the trait-based, zero-cost tracer this crate family uses for its
//! VM (`VmTracer`) instead of pulling in `log`/`tracing`: callers pick a
//! concrete implementation at construction time and the compiler
//! monomorphizes it away when it's [`NoopTracer`].
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (default) |
//! | [`StderrTracer`] | Human-readable one-line-per-event log to stderr |

/// Hook points at the key decisions this pass makes.
pub trait LowerTracer {
    /// A new state was allocated by the splitter, with a short reason
    /// (e.g. `"while-begin"`, `"try-finally"`).
    fn state_created(&mut self, provisional_id: i64, reason: &str) {
        let _ = (provisional_id, reason);
    }

    /// A `GotoState` marker was emitted targeting `target_id` (provisional
    /// or final, depending on when this fires).
    fn goto_emitted(&mut self, target_id: i64) {
        let _ = target_id;
    }

    /// Folding removed an empty state into its successor.
    fn state_folded(&mut self, empty_id: i64, forwards_to: i64) {
        let _ = (empty_id, forwards_to);
    }

    /// Exception-table construction finished.
    fn exception_table_built(&mut self, len: usize) {
        let _ = len;
    }
}

/// Default tracer: every hook compiles away entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl LowerTracer for NoopTracer {}

/// Prints a line to stderr for every event. Intended for debugging this pass
/// itself, never enabled in production compiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl LowerTracer for StderrTracer {
    fn state_created(&mut self, provisional_id: i64, reason: &str) {
        eprintln!("[iterlower] state {provisional_id} created ({reason})");
    }

    fn goto_emitted(&mut self, target_id: i64) {
        eprintln!("[iterlower] goto_state {target_id}");
    }

    fn state_folded(&mut self, empty_id: i64, forwards_to: i64) {
        eprintln!("[iterlower] folded empty state {empty_id} -> {forwards_to}");
    }

    fn exception_table_built(&mut self, len: usize) {
        eprintln!("[iterlower] exception table built, {len} entries");
    }
}
