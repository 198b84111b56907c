pub mod asserts;
pub mod evaluators;
pub mod fixtures;
pub mod harness;

#[allow(unused_imports)]
pub use asserts::*;
#[allow(unused_imports)]
pub use evaluators::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use harness::*;
