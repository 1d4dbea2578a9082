//! Component G — empty-state folding and final renumbering.
//!
//! The last cleanup pass: a state whose entire body (after stripping
//! [`crate::ast::skip_stmt_list_wrappers`]) is nothing but `goto_state(X)` is
//! pure overhead — every jump that targets it can point straight at `X`
//! instead. Folded away here before ids are handed out, so the final state
//! numbering has no gaps from states nobody ends up needing.
//!
//! Because every reference to a state is a shared [`StateId`] handle rather
//! than a plain integer, redirecting a fold
//! is just mutating the handle's target in place — no second tree walk to
//! rewrite jumps is needed, which is also how this same trick resolves
//! forward references that didn't exist yet when a `goto_state` was first
//! emitted.

use ahash::AHashMap;

use crate::ast::{GotoTarget, Stmt, StateId, StateRecord, skip_stmt_list_wrappers};
use crate::trace::LowerTracer;

/// Follows a chain of empty-state forwards to its ultimate target, the way
/// this resolves `forward[s] = forward[forward[s]]` to a
/// fixed point. Cycles (a state folds to itself via some chain) are
/// structurally impossible here — state splitting never emits a `goto_state`
/// back to a state that is itself nothing but a `goto_state` to the first —
/// but this still terminates on a visited-set to stay defensive.
fn resolve(forward: &AHashMap<usize, StateId>, mut id: StateId) -> StateId {
    let mut seen = std::collections::HashSet::new();
    loop {
        if !seen.insert(id.identity()) {
            return id;
        }
        match forward.get(&id.identity()) {
            Some(next) if next.identity() != id.identity() => id = next.clone(),
            _ => return id,
        }
    }
}

/// Folds empty states out of `states` and assigns every surviving state its
/// final, contiguous, zero-based id — `states[0]` (the entry) is guaranteed
/// to land on id `0` by [`crate::split::split_states`]'s own reordering, so
/// folding here only ever needs to preserve relative order, not hunt for the
/// entry specially.
pub fn fold_states<Tr: LowerTracer>(tracer: &mut Tr, states: Vec<StateRecord>) -> Vec<StateRecord> {
    let mut forward = AHashMap::new();
    // `states[0]` is always the entry. A state is empty iff it is neither
    // the first state (entry) nor the synthetic exit state.
    // Folding it away would hand id 0 to whatever it forwarded to, silently
    // changing which state runs first; it's never itself a fold candidate,
    // though it may still be the *target* of another state's fold.
    for state in states.iter().skip(1) {
        if let [Stmt::GotoState(GotoTarget::State(target))] = skip_stmt_list_wrappers(&state.body) {
            if target.identity() != state.id.identity() {
                forward.insert(state.id.identity(), target.clone());
            }
        }
    }

    let mut kept = Vec::with_capacity(states.len());
    let mut folded = Vec::new();
    for state in states {
        if forward.contains_key(&state.id.identity()) {
            folded.push(state.id.clone());
        } else {
            kept.push(state);
        }
    }

    for (i, state) in kept.iter().enumerate() {
        let id = i as i64;
        state.id.set(id);
        tracer.state_created(id, "fold-final");
    }

    // Each folded state's own handle is still shared with whatever
    // `GotoState` pointed directly at it; resolve it through the forward
    // chain to the surviving state it ultimately forwards to, now that every
    // surviving id is final, and write that back onto the shared cell.
    for id in folded {
        let pre_fold_id = id.get();
        let target = resolve(&forward, id.clone());
        id.set(target.get());
        tracer.state_folded(pre_fold_id, target.get());
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExcHandler, Stmt};
    use crate::trace::NoopTracer;

    fn goto(id: &StateId) -> Stmt {
        Stmt::GotoState(GotoTarget::State(id.clone()))
    }

    #[test]
    fn folds_a_pure_forwarder() {
        let a = StateId::provisional(100);
        let b = StateId::provisional(101);
        let c = StateId::provisional(102);
        // a does real work then falls into b; b is a pure forwarder to c.
        let unit_stmt = || {
            Stmt::ExprStmt(crate::ast::ExprLoc::new(
                crate::ast::CodeRange::synthetic(),
                crate::ast::Expr::Literal(crate::ast::Literal::Unit),
            ))
        };
        let states = vec![
            StateRecord { id: a.clone(), body: vec![unit_stmt(), goto(&b)], exc_handler: ExcHandler::None },
            StateRecord { id: b.clone(), body: vec![goto(&c)], exc_handler: ExcHandler::None },
            StateRecord { id: c.clone(), body: vec![Stmt::ExprStmt(crate::ast::ExprLoc::new(
                crate::ast::CodeRange::synthetic(),
                crate::ast::Expr::Literal(crate::ast::Literal::Unit),
            ))], exc_handler: ExcHandler::None },
        ];
        let mut tr = NoopTracer;
        let folded = fold_states(&mut tr, states);
        assert_eq!(folded.len(), 2);
        // `a`'s own goto-to-`b` handle must now resolve to `c`'s final id.
        assert_eq!(b.get(), c.get());
    }

    #[test]
    fn entry_is_never_folded_even_when_it_is_a_pure_forwarder() {
        // The entry itself reduces to nothing but `goto_state(b)` — folding
        // still forbids removing it, since that would hand id 0 to
        // `b` and silently change which state runs first.
        let entry = StateId::provisional(100);
        let b = StateId::provisional(101);
        let states = vec![
            StateRecord { id: entry.clone(), body: vec![goto(&b)], exc_handler: ExcHandler::None },
            StateRecord {
                id: b.clone(),
                body: vec![Stmt::ExprStmt(crate::ast::ExprLoc::new(
                    crate::ast::CodeRange::synthetic(),
                    crate::ast::Expr::Literal(crate::ast::Literal::Unit),
                ))],
                exc_handler: ExcHandler::None,
            },
        ];
        let mut tr = NoopTracer;
        let folded = fold_states(&mut tr, states);
        assert_eq!(folded.len(), 2, "the entry must survive folding despite looking like a pure forwarder");
        assert_eq!(entry.get(), 0);
        assert_eq!(folded[0].id.get(), 0);
    }

    #[test]
    fn keeps_entry_at_id_zero() {
        let entry = StateId::provisional(100);
        let other = StateId::provisional(101);
        let states = vec![
            StateRecord {
                id: entry.clone(),
                body: vec![Stmt::ExprStmt(crate::ast::ExprLoc::new(
                    crate::ast::CodeRange::synthetic(),
                    crate::ast::Expr::Literal(crate::ast::Literal::Unit),
                )), goto(&other)],
                exc_handler: ExcHandler::None,
            },
            StateRecord { id: other.clone(), body: vec![Stmt::ExprStmt(crate::ast::ExprLoc::new(
                crate::ast::CodeRange::synthetic(),
                crate::ast::Expr::Literal(crate::ast::Literal::Unit),
            ))], exc_handler: ExcHandler::None },
        ];
        let mut tr = NoopTracer;
        let folded = fold_states(&mut tr, states);
        assert_eq!(entry.get(), 0);
        assert_eq!(folded[0].id.get(), 0);
    }
}
