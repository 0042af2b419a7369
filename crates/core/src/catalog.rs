//! Resolves client-visible model names to candidate (upstream, actual-model)
//! pairs, and builds the aggregated `/v1/models` listing.

use crate::error::ProxyError;
use crate::model::{GlobalModelMapping, UpstreamConfig};
use std::collections::HashMap;

/// One upstream able to serve a requested model, paired with the model name
/// that upstream actually expects.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub config: UpstreamConfig,
    pub actual_model: String,
}

/// Resolve every upstream able to serve `client_model`.
///
/// Union of: (1) each config's own `model_mappings` entry for this client
/// model, provided the mapped target is also in that config's `models`; and
/// (2) each config whose `models` list contains the client model verbatim.
/// The global mapping is never consulted here — only by the listing below.
pub fn resolve_candidates(
    configs: &[UpstreamConfig],
    client_model: &str,
) -> Result<Vec<Candidate>, ProxyError> {
    let mut candidates = Vec::new();

    for config in configs {
        if let Some(actual) = config.model_mappings.get(client_model)
            && config.models.iter().any(|m| m == actual)
        {
            candidates.push(Candidate {
                config: config.clone(),
                actual_model: actual.clone(),
            });
        }
    }

    for config in configs {
        if config.models.iter().any(|m| m == client_model) {
            candidates.push(Candidate {
                config: config.clone(),
                actual_model: client_model.to_string(),
            });
        }
    }

    if candidates.is_empty() {
        return Err(ProxyError::NotFound(format!(
            "no upstream serves model '{client_model}'"
        )));
    }

    Ok(candidates)
}

/// One entry of the aggregated `/v1/models` response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelListing {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

/// Build the `/v1/models` listing: every model across every config, aliased
/// by the global mapping first, then the config's own mapping, else raw.
pub fn list_models(
    configs: &[UpstreamConfig],
    global_mappings: &GlobalModelMapping,
    created: i64,
) -> Vec<ModelListing> {
    // actual-model -> unified alias, built from the global mapping only.
    let mut reverse_global: HashMap<&str, &str> = HashMap::new();
    for (unified, by_vendor) in global_mappings {
        for actual in by_vendor.values() {
            reverse_global.insert(actual.as_str(), unified.as_str());
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for config in configs {
        // config's own actual-model -> alias, for the fallback lookup.
        let reverse_local: HashMap<&str, &str> = config
            .model_mappings
            .iter()
            .map(|(alias, actual)| (actual.as_str(), alias.as_str()))
            .collect();

        for model in &config.models {
            let id = reverse_global
                .get(model.as_str())
                .or_else(|| reverse_local.get(model.as_str()))
                .copied()
                .unwrap_or(model.as_str());

            if seen.insert(id.to_string()) {
                out.push(ModelListing {
                    id: id.to_string(),
                    object: "model",
                    created,
                    owned_by: "uniapi",
                });
            }
        }
    }

    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}
