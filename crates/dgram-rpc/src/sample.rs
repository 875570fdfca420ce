//! Demo procedures served by the binary.

use dgram_core::{Failure, ProcedureRegistry};

/// Type name every demo procedure is registered under.
pub const SAMPLE_TYPE: &str = "Sample";

fn integer_array_test(values: Vec<i32>) -> i32 {
    values.iter().sum()
}

fn fail(reason: String) -> Result<i32, Failure> {
    Err(Failure::new("IllegalState", reason))
}

/// Register the demo procedures.
///
/// `sum` is overloaded for zero, one and three `i32` arguments so callers
/// can see exact signature matching at work.
pub fn register(registry: &mut ProcedureRegistry) {
    registry
        .register(SAMPLE_TYPE, "sum", || 0i32)
        .register(SAMPLE_TYPE, "sum", |a: i32| a)
        .register(SAMPLE_TYPE, "sum", |a: i32, b: i32, c: i32| a + b + c)
        .register(SAMPLE_TYPE, "integerArrayTest", integer_array_test)
        .register(SAMPLE_TYPE, "ping", || "pong".to_string())
        .register(SAMPLE_TYPE, "fail", fail);
}

pub fn registry() -> ProcedureRegistry {
    let mut registry = ProcedureRegistry::new();
    register(&mut registry);
    registry
}
