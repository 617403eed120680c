pub mod error;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::PaymentProcessor;
pub use registry::ProcessorRegistry;
pub use types::{
    PaymentMedium, ProcessorCredential, ProcessorRequest, ProcessorResponse, ProviderStatus,
    StatusQueryResponse,
};
