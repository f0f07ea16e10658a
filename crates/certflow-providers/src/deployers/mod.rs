pub mod local;
pub mod webhook;

pub use local::LocalDeployer;
pub use webhook::WebhookDeployer;
