//! End-to-end scenarios and invariant checks, one per item in the testable
//! properties this pass must satisfy. Each test builds a
//! small iterator body by hand — there is no source-language parser in this
//! crate's scope — and runs it through the full pipeline or a prefix of it,
//! then asserts on the shape of what comes out.

use iterlower::ast::{
    AssignTarget, BinOp, BlockLabel, CodeRange, ExcHandler, Expr, ExprLoc, Ident, Literal, Stmt, StateRecord, TryStmt,
};
use iterlower::env::Env;
use iterlower::host::test_support::TestHost;
use iterlower::trace::NoopTracer;
use iterlower::{fold, split};

fn at() -> CodeRange {
    CodeRange::synthetic()
}

fn name(s: &str) -> ExprLoc {
    ExprLoc::new(at(), Expr::Name(Ident::new(s, at())))
}

fn int(v: i64) -> ExprLoc {
    ExprLoc::new(at(), Expr::Literal(Literal::Int(v)))
}

fn assign(target: &str, value: ExprLoc) -> Stmt {
    Stmt::Assign { target: AssignTarget::Name(Ident::new(target, at())), value }
}

/// Checks that state ids are contiguous from zero and every state's body
/// ends in a proper control transfer, against a folded, final-id
/// state list: exactly one exit reference per terminal jump, every
/// non-exit state's body ends in `return`/`raise`/a jump, and ids are a
/// contiguous `0..len` run.
fn assert_basic_invariants(states: &[StateRecord]) {
    let mut ids: Vec<i64> = states.iter().map(|s| s.id.get()).collect();
    ids.sort_unstable();
    let expected: Vec<i64> = (0..states.len() as i64).collect();
    assert_eq!(ids, expected, "state ids must be contiguous from 0 (invariant 7)");

    for state in states {
        let last = state.body.last().unwrap_or_else(|| panic!("state {} has an empty body", state.id.get()));
        let ends_properly = matches!(last, Stmt::GotoState(_) | Stmt::Return(_) | Stmt::Raise(_) | Stmt::GotoStateDynamic(_) | Stmt::If { .. });
        assert!(ends_properly, "state {} does not end in a control transfer: {last:?}", state.id.get());
    }
}

/// `while a > 0: yield a; dec a`.
#[test]
fn simple_counter_end_to_end() {
    let mut host = TestHost::without_env(true, "i64");
    let mut env = Env::new(&mut host);
    let mut tracer = NoopTracer;

    let body = vec![Stmt::While {
        test: ExprLoc::new(at(), Expr::BinOp { op: BinOp::Gt, lhs: Box::new(name("a")), rhs: Box::new(int(0)) }),
        body: vec![Stmt::Yield(Some(name("a"))), assign("a", int(0))],
    }];

    let states = split::split_states(&mut env, &mut tracer, body).unwrap();
    let folded = fold::fold_states(&mut tracer, states);
    assert_basic_invariants(&folded);

    // Nothing here has a `try`, so no exception table entry should be
    // needed — every `exc_handler` stays `None`.
    assert!(folded.iter().all(|s| matches!(s.exc_handler, ExcHandler::None)));
}

/// `try: yield 1; raise E except: yield 2`. The
/// exception table (built once ids are final) must route the try state to
/// the except state with a negative entry.
#[test]
fn try_except_exception_table_entry() {
    let mut host = TestHost::without_env(false, "()");
    let mut env = Env::new(&mut host);
    let mut tracer = NoopTracer;

    let body = vec![Stmt::Try(TryStmt {
        body: vec![Stmt::Yield(Some(int(1))), Stmt::Raise(Some(name("E")))],
        handlers: vec![iterlower::ast::ExceptHandler { exc_type: None, bound_name: None, body: vec![Stmt::Yield(Some(int(2)))] }],
        or_else: vec![],
        finally: vec![],
    })];

    let states = split::split_states(&mut env, &mut tracer, body).unwrap();
    let folded = fold::fold_states(&mut tracer, states);
    assert_basic_invariants(&folded);

    let table = iterlower::exc_table::build_exception_table(&mut tracer, &folded);
    assert_eq!(table.len(), folded.len());

    let try_state = folded
        .iter()
        .find(|s| matches!(s.body.first(), Some(Stmt::Yield(Some(_)))) && matches!(s.exc_handler, ExcHandler::Except(_)))
        .expect("the try-body state");
    let idx = usize::try_from(try_state.id.get()).unwrap();
    assert!(table[idx] < 0, "a try routed to an except state must have a negative table entry");
}

/// `try: return 7 finally: yield 0`. The exception
/// table entry for the try state must be positive (routes to a `finally`,
/// not an `except`), and the final return value flows through `tmpResult`.
#[test]
fn return_in_try_finally_table_entry_is_positive() {
    let mut host = TestHost::without_env(true, "i64");
    let mut env = Env::new(&mut host);
    let mut tracer = NoopTracer;

    let body = vec![Stmt::Try(TryStmt {
        body: vec![Stmt::Return(Some(int(7)))],
        handlers: vec![],
        or_else: vec![],
        finally: vec![Stmt::Yield(Some(int(0)))],
    })];

    let states = split::split_states(&mut env, &mut tracer, body).unwrap();
    let folded = fold::fold_states(&mut tracer, states);
    assert_basic_invariants(&folded);

    let table = iterlower::exc_table::build_exception_table(&mut tracer, &folded);
    let try_state = folded
        .iter()
        .find(|s| matches!(s.exc_handler, ExcHandler::Finally(_)) && s.body.iter().any(|st| matches!(st, Stmt::Assign { .. })))
        .expect("the try-body state");
    let idx = usize::try_from(try_state.id.get()).unwrap();
    assert!(table[idx] > 0, "a try routed to a finally state must have a positive table entry");
}

/// `block B: try: yield 1; break B finally: yield 2`.
/// After folding, the state holding the partial-unroll sequence must still
/// end in a jump into the finally region.
#[test]
fn break_across_finally_survives_folding() {
    let mut host = TestHost::without_env(false, "()");
    let mut env = Env::new(&mut host);
    let mut tracer = NoopTracer;

    let label = BlockLabel(1);
    let body = vec![Stmt::Block {
        label: Some(label),
        body: vec![Stmt::Try(TryStmt {
            body: vec![Stmt::Yield(Some(int(1))), Stmt::Break { label: Some(label) }],
            handlers: vec![],
            or_else: vec![],
            finally: vec![Stmt::Yield(Some(int(2)))],
        })],
    }];

    let states = split::split_states(&mut env, &mut tracer, body).unwrap();
    let folded = fold::fold_states(&mut tracer, states);
    assert_basic_invariants(&folded);

    let unroll_state = folded
        .iter()
        .find(|s| s.body.iter().filter(|st| matches!(st, Stmt::Assign { .. })).count() == 3)
        .expect("the state holding the break's three-assignment unroll sequence");
    assert!(matches!(unroll_state.body.last(), Some(Stmt::GotoState(_))));
}

/// A pathological input that produces a state whose
/// only content is `goto_state X` gets folded away, and every predecessor's
/// jump lands directly on `X`.
#[test]
fn empty_state_folding_removes_pure_forwarders() {
    use iterlower::ast::{GotoTarget, StateId};

    let a = StateId::provisional(100);
    let b = StateId::provisional(101);
    let c = StateId::provisional(102);
    let unit = || Stmt::ExprStmt(ExprLoc::new(at(), Expr::Literal(Literal::Unit)));

    let states = vec![
        StateRecord { id: a.clone(), body: vec![unit(), Stmt::GotoState(GotoTarget::State(b.clone()))], exc_handler: ExcHandler::None },
        StateRecord { id: b.clone(), body: vec![Stmt::GotoState(GotoTarget::State(c.clone()))], exc_handler: ExcHandler::None },
        StateRecord { id: c.clone(), body: vec![unit()], exc_handler: ExcHandler::None },
    ];

    let mut tracer = NoopTracer;
    let folded = fold::fold_states(&mut tracer, states);
    assert_eq!(folded.len(), 2, "the pure-forwarder state b must be removed");
    assert_basic_invariants(&folded);
    // a's own goto handle, still shared with the folded record, now points
    // straight at c's final id rather than b's.
    assert_eq!(b.get(), c.get());
}

/// An iterator with no `yield` anywhere
/// lowers to exactly one state whose body is the original body followed by
/// an exit transfer.
#[test]
fn yield_free_body_is_a_single_state() {
    let mut host = TestHost::without_env(false, "()");
    let mut env = Env::new(&mut host);
    let mut tracer = NoopTracer;

    let body = vec![assign("x", int(1)), assign("y", int(2))];
    let states = split::split_states(&mut env, &mut tracer, body).unwrap();
    let mut folded = fold::fold_states(&mut tracer, states);

    assert_eq!(folded.len(), 1);
    assert_eq!(folded[0].id.get(), 0);
    assert!(matches!(folded[0].body[0], Stmt::Assign { .. }));
    assert!(matches!(folded[0].body[1], Stmt::Assign { .. }));
    assert!(matches!(folded[0].body.last(), Some(Stmt::GotoState(iterlower::ast::GotoTarget::State(id))) if id.is_exit()));

    folded[0].body = iterlower::assign::resolve_state_refs(&mut env, std::mem::take(&mut folded[0].body));
    let len = folded[0].body.len();
    assert!(
        matches!(folded[0].body[len - 2], Stmt::Assign { .. }),
        "exit goto resolves to state := -1 before breaking: {:?}",
        folded[0].body
    );
    assert!(
        matches!(folded[0].body.last(), Some(Stmt::Break { label: Some(l) }) if *l == iterlower::ast::STATE_LOOP_LABEL),
        "exit goto resolves to break stateLoop, not a bare return: {:?}",
        folded[0].body
    );
}

/// Scenario 1 (simple counter), run through the full pipeline: must match
/// `S0: if a>0 {state:=1; iterResult:=a; return} else {state:=-1; break}`,
/// `S1: dec a; state:=0; break}` exactly, modulo the outer loop scaffold.
#[test]
fn simple_counter_matches_the_documented_state_machine() {
    let mut host = TestHost::without_env(false, "i64");
    let mut tracer = NoopTracer;

    let body = vec![Stmt::While {
        test: ExprLoc::new(at(), Expr::BinOp { op: BinOp::Gt, lhs: Box::new(name("a")), rhs: Box::new(int(0)) }),
        body: vec![Stmt::Yield(Some(name("a"))), assign("a", ExprLoc::new(at(), Expr::BinOp { op: BinOp::Sub, lhs: Box::new(name("a")), rhs: Box::new(int(1)) }))],
    }];

    let out = iterlower::transform_closure_iterator(&mut host, &mut tracer, body).unwrap();
    let Some(Stmt::Block { label: Some(l), body: loop_body }) = out.last() else { panic!("expected the stateLoop scaffold: {out:?}") };
    assert_eq!(*l, iterlower::ast::STATE_LOOP_LABEL);
    let Some(Stmt::While { body: rungs, .. }) = loop_body.first() else { panic!("expected the while(true) dispatch loop: {loop_body:?}") };

    let states: Vec<&Stmt> = rungs.iter().filter(|s| matches!(s, Stmt::State(_))).collect();
    assert_eq!(states.len(), 2, "expected exactly two states: {rungs:?}");

    let Stmt::State(s0) = states[0] else { unreachable!() };
    assert_eq!(s0.id.get(), 0);
    let Stmt::If { body: then_body, or_else, .. } = s0.body.last().expect("S0 ends in the loop guard") else {
        panic!("S0's last statement must be the `if a > 0` guard: {:?}", s0.body)
    };
    assert!(matches!(then_body[0], Stmt::Assign { .. }), "then-branch: state := 1");
    assert!(matches!(then_body[1], Stmt::Assign { .. }), "then-branch: iterResult := a");
    assert!(matches!(then_body[2], Stmt::Return(None)), "then-branch: bare return, value routed through iterResult");
    assert!(matches!(or_else[0], Stmt::Assign { .. }), "else-branch: state := -1");
    assert!(
        matches!(or_else.last(), Some(Stmt::Break { label: Some(l) }) if *l == iterlower::ast::STATE_LOOP_LABEL),
        "else-branch: break stateLoop, not a bare return: {or_else:?}"
    );

    let Stmt::State(s1) = states[1] else { unreachable!() };
    assert_eq!(s1.id.get(), 1);
    let len = s1.body.len();
    assert!(matches!(s1.body[len - 2], Stmt::Assign { .. }), "S1 penultimate: state := 0");
    assert!(
        matches!(s1.body.last(), Some(Stmt::Break { label: Some(l) }) if *l == iterlower::ast::STATE_LOOP_LABEL),
        "S1 last: break stateLoop: {:?}",
        s1.body
    );
}

/// The full pipeline, end to end, on scenario 3's try/finally body: must
/// produce the `block stateLoop: while true { ... }` scaffold from the
/// loop-wrapping scaffold, carrying a synthesized local-variable section (no environment
/// record in this test's host) for the hidden unroll-protocol variables a
/// `try`/`finally` with a pending `return` actually touches.
#[test]
fn full_pipeline_wraps_in_the_state_loop_scaffold() {
    let mut host = TestHost::without_env(true, "i64");
    let mut tracer = NoopTracer;

    let body = vec![Stmt::Try(TryStmt {
        body: vec![Stmt::Return(Some(int(7)))],
        handlers: vec![],
        or_else: vec![],
        finally: vec![Stmt::Yield(Some(int(0)))],
    })];

    let out = iterlower::transform_closure_iterator(&mut host, &mut tracer, body).unwrap();

    // A local-variable section for `unrollFinally`/`tmpResult`/etc. must
    // precede the loop scaffold, since this host has no env param.
    assert!(matches!(out[0], Stmt::VarSection(_)), "expected a synthesized local section first: {out:?}");
    let has_state_loop = out.iter().any(|s| matches!(s, Stmt::Block { label: Some(l), .. } if *l == iterlower::ast::STATE_LOOP_LABEL));
    assert!(has_state_loop, "expected the stateLoop block scaffold in the output: {out:?}");
}

/// Lambda-lifted mode: when the host reports an env param, the hidden
/// unroll-protocol variables a `try`/`finally` with a pending `return`
/// touches land on the env record as uniquely-named fields rather than
/// plain locals, and no local-variable section is synthesized for them.
#[test]
fn lambda_lifted_host_uses_env_fields_not_locals() {
    let mut host = TestHost::with_env("env", true, "i64");
    let mut tracer = NoopTracer;

    let body = vec![Stmt::Try(TryStmt {
        body: vec![Stmt::Return(Some(int(7)))],
        handlers: vec![],
        or_else: vec![],
        finally: vec![Stmt::Yield(Some(int(0)))],
    })];
    let out = iterlower::transform_closure_iterator(&mut host, &mut tracer, body).unwrap();

    assert!(!matches!(out.first(), Some(Stmt::VarSection(_))), "env-backed host must not synthesize a local section: {out:?}");
    assert!(host.fields().next().is_some(), "expected hidden variables to land on env fields");
    assert!(host.locals().is_empty(), "no plain locals should have been allocated when an env param is present");
}
