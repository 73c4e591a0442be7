//! deno_core ops exposed to the render bootstrap.
//!
//! `#[op2]` generates public items that cannot carry doc comments.
#![allow(missing_docs)]

use deno_core::op2;
use deno_core::OpState;

/// Serialized `{ok}` / `{error}` outcome of a render.
pub struct RenderResult(pub String);

/// Record the render outcome. Only the first call counts.
#[op2(fast)]
pub fn op_glimpse_set_result(state: &mut OpState, #[string] json: &str) {
    if !state.has::<RenderResult>() {
        state.put(RenderResult(json.to_string()));
    }
}

deno_core::extension!(glimpse_ext, ops = [op_glimpse_set_result]);
