//! A closure-iterator lowering pass: rewrites generator-style routines
//! (routines containing `yield`) into a flat state machine over a numbered
//! program counter, coordinating with an external lambda-lifting pass and
//! preserving `try`/`finally`/`return`/`break` semantics across suspension
//! points.
//!
//! The pass runs as a pipeline of components, each its own module, matching
//! the shape described by this crate's design ledger (`DESIGN.md`):
//!
//! 1. [`expr_lower`] — statement-list-expression lowering (no `yield` left
//!    nested inside an expression).
//! 2. [`try_pre`] — return-in-try and except-else normalization, ahead of
//!    splitting.
//! 3. [`split`] — the state splitter, the centerpiece of this pass.
//! 4. [`fold`] — empty-state folding.
//! 5. [`assign`] — state-assignment lowering (`goto_state` materialized into
//!    `state := k` plus `break`/`return`).
//! 6. [`exc_table`] — exception table construction and the catch wrapper.
//!
//! [`env`] underlies all of them: it is the only place that knows whether
//! hidden state lives on a lambda-lifted environment record or in plain
//! locals.

pub mod assign;
pub mod ast;
pub mod env;
pub mod error;
pub mod exc_table;
pub mod expr_lower;
pub mod fold;
pub mod host;
pub mod split;
pub mod trace;
pub mod try_pre;

pub use ast::{CodeLoc, CodeRange, Stmt};
pub use error::{LowerError, LowerResult};
pub use host::CompilerHost;
pub use trace::{LowerTracer, NoopTracer};

/// Runs the whole pipeline on one iterator body, end to end:
/// expression lowering, state splitting (which itself applies the
/// return-in-try and except-else normalizations as it descends into each
/// `try`), empty-state folding, state-reference resolution, and finally the
/// exception table plus the `stateLoop` scaffold that carries it.
///
/// `tracer` observes the splitting and folding decisions; pass
/// [`trace::NoopTracer`] when nothing is listening.
pub fn transform_closure_iterator<H: host::CompilerHost, Tr: trace::LowerTracer>(
    host: &mut H,
    tracer: &mut Tr,
    body: Vec<ast::Stmt>,
) -> error::LowerResult<Vec<ast::Stmt>> {
    let mut env = env::Env::new(host);
    let at = ast::CodeRange::synthetic();

    let lowered = expr_lower::lower_expressions(&mut env, body)?;
    let states = split::split_states(&mut env, tracer, lowered)?;
    let folded = fold::fold_states(tracer, states);
    let table = exc_table::build_exception_table(tracer, &folded);

    let resolved: Vec<_> = folded
        .into_iter()
        .map(|mut rec| {
            rec.body = assign::resolve_state_refs(&mut env, rec.body);
            rec
        })
        .collect();

    let state_loop = exc_table::build_state_loop(&mut env, &table, resolved, at);

    let mut out = Vec::new();
    out.extend(env.take_local_section());
    out.push(state_loop);
    Ok(out)
}
