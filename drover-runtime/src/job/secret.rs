//! Image pull secrets for configured registries

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use drover_core::consts::DEFAULT_IMAGE_PULL_SECRET;
use drover_core::domain::payload::RegistryNamespace;
use drover_kube::{ObjectMeta, Secret};

const REGISTRY_SECRET_SUFFIX: &str = "-registry-secret";
const SECRET_EMAIL: &str = "bot@koderover.com";
const MAX_NAME_LEN: usize = 237;

static ILLEGAL_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\.-]+").expect("valid regex"));

fn format_registry_name(name: &str) -> String {
    let mut name = ILLEGAL_NAME_CHARS.replace_all(name, "").to_lowercase();
    name.truncate(MAX_NAME_LEN);
    name
}

/// Name of the pull secret of `reg`
///
/// The default registry always uses `default-registry-secret`. Others are
/// named after the last segment of their namespace, or after the first
/// label of the address when they have none (ECR).
pub fn registry_secret_name(reg: &RegistryNamespace) -> String {
    if reg.is_default {
        return DEFAULT_IMAGE_PULL_SECRET.to_string();
    }

    let mut base = reg.namespace.rsplit('/').next().unwrap_or_default();
    if base.is_empty() {
        base = reg.reg_addr.split('.').next().unwrap_or_default();
    }
    let name = format_registry_name(base);

    if reg.reg_type.is_empty() {
        format!("{}{}", name, REGISTRY_SECRET_SUFFIX)
    } else {
        format!("{}-{}{}", name, reg.reg_type, REGISTRY_SECRET_SUFFIX)
    }
}

/// `.dockercfg` secrets for every registry with credentials
pub fn registry_secrets(registries: &[RegistryNamespace]) -> Vec<Secret> {
    registries
        .iter()
        .filter(|reg| !reg.access_key.is_empty())
        .map(|reg| {
            let mut config = serde_json::Map::new();
            config.insert(
                reg.reg_addr.clone(),
                serde_json::json!({
                    "username": reg.access_key,
                    "password": reg.secret_key,
                    "email": SECRET_EMAIL,
                }),
            );
            Secret::new(
                ObjectMeta::named(registry_secret_name(reg)),
                Secret::DOCKERCFG_TYPE,
                BTreeMap::from([(
                    ".dockercfg".to_string(),
                    serde_json::Value::Object(config).to_string(),
                )]),
            )
        })
        .collect()
}
