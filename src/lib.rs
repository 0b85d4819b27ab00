// Platform bridge between a UI layer and the device media library:
// typed operations in, exactly-once outcomes out, with consent-gated
// mutations correlated back through the OS callback.

pub mod artwork;
pub mod capability;
pub mod consent;
pub mod deletion;
pub mod dispatcher;
pub mod error;
pub mod mutation;
pub mod query;
pub mod request;
pub mod store;

// Test support (only available with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use capability::CapabilityLevel;
pub use consent::{ConsentKind, ConsentRequest, ConsentRequester};
pub use dispatcher::{CallId, Completion, Dispatcher, Outcome, Replier};
pub use error::{BridgeError, Failure};
pub use store::MediaStore;
