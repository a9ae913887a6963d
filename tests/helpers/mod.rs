pub mod upstream;

pub use upstream::{eventually, FakeUpstream, API_KEY};
