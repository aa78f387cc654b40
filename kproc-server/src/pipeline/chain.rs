//! Auto-process chain
//!
//! After an upload, the configured model chain runs in order. Each link
//! respects the skip cache; when a link fails, later links that depend on
//! its stage are skipped while independent links proceed.

use super::{StageRequest, StageRunner};
use crate::processors::{Params, Registry};
use kproc_common::{FileId, StageKind};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run_chain(
    runner: Arc<StageRunner>,
    registry: Arc<Registry>,
    chain: &[String],
    file_id: FileId,
    request_id: &str,
) {
    let mut failed: HashSet<StageKind> = HashSet::new();

    for model in chain {
        let processor = match registry.get(model) {
            Ok(processor) => processor,
            Err(e) => {
                warn!(file_id = %file_id, model = %model, error = %e, "Chain names unknown model, skipping");
                continue;
            }
        };

        if let Some(dep) = processor
            .dependencies()
            .iter()
            .find(|d| failed.contains(d))
        {
            warn!(
                file_id = %file_id,
                stage = %processor.stage(),
                dependency = %dep,
                "Skipping chain stage, dependency failed"
            );
            continue;
        }

        let request = StageRequest {
            file_id,
            model: model.clone(),
            variant: None,
            params: Params::new(),
            request_id: request_id.to_string(),
        };
        match runner.run(request).await {
            Ok(outcome) => {
                info!(
                    file_id = %file_id,
                    stage = %processor.stage(),
                    skipped = outcome.skipped,
                    "Chain stage finished"
                );
            }
            Err(e) => {
                warn!(file_id = %file_id, stage = %processor.stage(), error = %e, "Chain stage failed");
                failed.insert(processor.stage());
            }
        }
    }

    info!(file_id = %file_id, "Auto-process chain finished");
}
