//! The interface this pass consumes from the rest of the compiler.
//!
//! Everything named here — symbol/type factories, the lambda-lifting
//! boundary, the runtime helper calls, the monotonic id allocator, the fatal
//! diagnostic channel — is an external collaborator. This crate never
//! implements a real one; it only defines the trait and, behind
//! `test-support`, an in-memory implementation used by its own tests and by
//! the CLI harness.

use crate::ast::{CodeRange, Expr, ExprLoc, Stmt, Symbol, TypeRef};
use crate::error::LowerError;

/// Identifies the lambda-lifted environment record, when one exists.
pub type EnvHandle = Symbol;
/// A field on the environment record.
pub type FieldHandle = Symbol;
/// A synthesized local/temporary symbol.
pub type TempHandle = Symbol;
/// A type, named opaquely — the full type system is out of scope here.
pub type TypeHandle = TypeRef;

/// Everything this pass consumes from the compiler.
pub trait CompilerHost {
    /// Returns the environment parameter's symbol iff lambda-lifting already
    /// ran for this iterator. Its absence is how Component A decides whether
    /// hidden variables become env fields or ordinary locals.
    fn get_env_param(&self) -> Option<EnvHandle>;

    /// Returns the field already allocated on `env` for `state`, creating it
    /// the first time. `state` is special: the code generator depends on it
    /// being field 0.
    fn get_state_field(&mut self, env: &EnvHandle) -> FieldHandle;

    /// Allocates a new, uniquely-named field of `ty` on `env`, or a bare local
    /// when `env` isn't in play — callers decide which by whether they hold
    /// an `EnvHandle`.
    fn add_unique_field(&mut self, env: &EnvHandle, hint: &str, ty: &TypeHandle) -> FieldHandle;

    /// Allocates a fresh local variable (no environment record available).
    fn add_local(&mut self, hint: &str, ty: &TypeHandle) -> TempHandle;

    /// The symbol that holds the yielded/returned value, shared with the
    /// code generator.
    fn get_closure_iter_result(&mut self) -> TempHandle;

    /// The integer type synthesized for `state`.
    fn create_closure_iter_state_type(&mut self) -> TypeHandle;

    /// Whether the iterator being lowered declares a non-unit return type.
    /// Gates whether a hidden result temporary may be created.
    fn has_return_type(&self) -> bool;

    /// The iterator's return type, when it has one.
    fn return_type(&self) -> TypeHandle;

    /// Monotonic id allocator, used to keep synthesized symbol names unique.
    fn fresh_id(&mut self) -> u32;

    /// Materializes a call to the runtime helper `getCurrentException()`,
    /// kept external to this pass rather than implemented here.
    fn call_get_current_exception(&mut self, at: CodeRange) -> ExprLoc;

    /// Materializes a call to the runtime helper
    /// `closureIterSetupExc(exc_or_none)`, used by the end-of-finally sequence
    /// and the catch wrapper.
    fn call_closure_iter_setup_exc(&mut self, arg: Option<ExprLoc>, at: CodeRange) -> Stmt;

    /// Raises a fatal internal error through the compiler's diagnostic
    /// channel. The pass itself treats this identically to returning `Err`;
    /// hosts that also want to
    /// emit a diagnostic can do that here before the error propagates.
    fn internal_error(&self, msg: impl Into<String>) -> LowerError {
        LowerError::internal(msg.into())
    }
}

/// Builds an expression testing whether `exc` is an instance of `ty`.
///
/// Exposed on the host because exception-type tests are themselves a
/// runtime-type-system concern, which is out of scope here; this crate
/// models it as a plain binary comparison so the state splitter has
/// something concrete to emit for an `except` clause's type test.
pub fn is_instance_test(exc: ExprLoc, ty: ExprLoc, at: CodeRange) -> ExprLoc {
    ExprLoc::new(
        at,
        Expr::BinOp {
            op: crate::ast::BinOp::Eq,
            lhs: Box::new(ExprLoc::new(
                at,
                Expr::Call {
                    callee: Box::new(ExprLoc::new(at, Expr::Name(crate::ast::Ident::new("type_of", at)))),
                    args: vec![exc],
                },
            )),
            rhs: Box::new(ty),
        },
    )
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! An in-memory [`CompilerHost`] for this crate's own tests and for the
    //! CLI harness.

    use std::collections::BTreeMap;

    use super::{CompilerHost, EnvHandle, FieldHandle, TempHandle, TypeHandle};
    use crate::ast::{CodeRange, Expr, ExprLoc, Ident, Stmt, Symbol, TypeRef};

    #[derive(Debug, Default)]
    pub struct TestHost {
        env_param: Option<EnvHandle>,
        has_return_type: bool,
        return_type: TypeHandle,
        next_id: u32,
        state_field: Option<FieldHandle>,
        fields: BTreeMap<String, FieldHandle>,
        locals: Vec<TempHandle>,
        closure_iter_result: Option<TempHandle>,
    }

    impl TestHost {
        /// A host as if lambda-lifting has *not* yet run: hidden state lives
        /// in plain locals.
        pub fn without_env(has_return_type: bool, return_type: impl Into<String>) -> Self {
            Self {
                has_return_type,
                return_type: TypeRef(return_type.into()),
                ..Self::default()
            }
        }

        /// A host as if lambda-lifting already ran: hidden state lives in
        /// fields of `env`.
        pub fn with_env(env: &str, has_return_type: bool, return_type: impl Into<String>) -> Self {
            Self {
                env_param: Some(Symbol(env.to_owned())),
                has_return_type,
                return_type: TypeRef(return_type.into()),
                ..Self::default()
            }
        }

        pub fn locals(&self) -> &[TempHandle] {
            &self.locals
        }

        pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldHandle)> {
            self.fields.iter()
        }
    }

    impl CompilerHost for TestHost {
        fn get_env_param(&self) -> Option<EnvHandle> {
            self.env_param.clone()
        }

        fn get_state_field(&mut self, env: &EnvHandle) -> FieldHandle {
            self.state_field
                .get_or_insert_with(|| {
                    let _ = env;
                    Symbol("state".to_owned())
                })
                .clone()
        }

        fn add_unique_field(&mut self, _env: &EnvHandle, hint: &str, _ty: &TypeHandle) -> FieldHandle {
            self.next_id += 1;
            let name = format!("{hint}_{}", self.next_id);
            let field = Symbol(name.clone());
            self.fields.insert(name, field.clone());
            field
        }

        fn add_local(&mut self, hint: &str, _ty: &TypeHandle) -> TempHandle {
            self.next_id += 1;
            let local = Symbol(format!("{hint}_{}", self.next_id));
            self.locals.push(local.clone());
            local
        }

        fn get_closure_iter_result(&mut self) -> TempHandle {
            self.closure_iter_result
                .get_or_insert_with(|| Symbol("iterResult".to_owned()))
                .clone()
        }

        fn create_closure_iter_state_type(&mut self) -> TypeHandle {
            TypeRef("i32".to_owned())
        }

        fn has_return_type(&self) -> bool {
            self.has_return_type
        }

        fn return_type(&self) -> TypeHandle {
            self.return_type.clone()
        }

        fn fresh_id(&mut self) -> u32 {
            self.next_id += 1;
            self.next_id
        }

        fn call_get_current_exception(&mut self, at: CodeRange) -> ExprLoc {
            ExprLoc::new(
                at,
                Expr::Call {
                    callee: Box::new(ExprLoc::new(at, Expr::Name(Ident::new("getCurrentException", at)))),
                    args: vec![],
                },
            )
        }

        fn call_closure_iter_setup_exc(&mut self, arg: Option<ExprLoc>, at: CodeRange) -> Stmt {
            Stmt::ExprStmt(ExprLoc::new(
                at,
                Expr::Call {
                    callee: Box::new(ExprLoc::new(at, Expr::Name(Ident::new("closureIterSetupExc", at)))),
                    args: arg.into_iter().collect(),
                },
            ))
        }
    }
}
