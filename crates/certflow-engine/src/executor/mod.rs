mod apply;
mod deploy;
mod flow;
mod monitor;
mod notify;
mod upload;

use chrono::Utc;
use futures::future::BoxFuture;

use certflow_core::error::Result;
use certflow_core::node::NodeType;
use certflow_core::traits::CertificateInfo;
use certflow_core::types::{new_id, Certificate, CertificateSource};

use crate::context::{NodeExecutionContext, NodeExecutionResult};

pub use apply::ApplyExecutor;
pub use deploy::{DeployExecutor, OUTPUT_DEPLOYED};
pub use flow::{BlockExecutor, ConditionExecutor, DelayExecutor, MarkerExecutor, TryCatchExecutor};
pub use monitor::MonitorExecutor;
pub use notify::NotifyExecutor;
pub use upload::UploadExecutor;

/// One strategy per node type.
pub trait NodeExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        ctx: NodeExecutionContext<'a>,
    ) -> BoxFuture<'a, Result<NodeExecutionResult>>;
}

/// The executor responsible for `node_type`.
pub fn executor_for(node_type: NodeType) -> &'static dyn NodeExecutor {
    match node_type {
        NodeType::Start | NodeType::End => &MarkerExecutor,
        NodeType::Condition => &ConditionExecutor,
        NodeType::BranchBlock | NodeType::TryBlock | NodeType::CatchBlock => &BlockExecutor,
        NodeType::TryCatch => &TryCatchExecutor,
        NodeType::Delay => &DelayExecutor,
        NodeType::BizApply => &ApplyExecutor,
        NodeType::BizUpload => &UploadExecutor,
        NodeType::BizMonitor => &MonitorExecutor,
        NodeType::BizDeploy => &DeployExecutor,
        NodeType::BizNotify => &NotifyExecutor,
    }
}

/// A certificate record for material produced by the node in `ctx`.
pub(crate) fn new_certificate(
    ctx: &NodeExecutionContext<'_>,
    source: CertificateSource,
    info: CertificateInfo,
    certificate: String,
    issuer_certificate: String,
    private_key: String,
) -> Certificate {
    Certificate {
        id: new_id(),
        source,
        subject_alt_names: info.subject_alt_names,
        certificate,
        issuer_certificate,
        private_key,
        key_algorithm: info.key_algorithm,
        serial_number: info.serial_number,
        issuer_org: info.issuer_org,
        valid_from: info.valid_from,
        valid_to: info.valid_to,
        acme_account_url: String::new(),
        acme_certificate_url: String::new(),
        renewed_from_id: None,
        workflow_id: ctx.run.workflow_id.clone(),
        workflow_run_id: ctx.run.run_id.clone(),
        workflow_node_id: ctx.node.id.clone(),
        created_at: Utc::now(),
    }
}
