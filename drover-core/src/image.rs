//! Image reference helpers

use url::Url;

use crate::domain::payload::RegistryNamespace;

/// Strips the scheme from a registry address, keeping host and path
///
/// Addresses without a scheme are returned unchanged.
pub fn trim_url_scheme(addr: &str) -> String {
    if !addr.contains("://") {
        return addr.to_string();
    }
    let Ok(url) = Url::parse(addr) else {
        return addr.to_string();
    };
    let mut host = url.host_str().unwrap_or_default().to_string();
    if let Some(port) = url.port() {
        host = format!("{}:{}", host, port);
    }
    let path = match url.path() {
        "/" if !addr.ends_with('/') => "",
        path => path,
    };
    format!("{}{}", host, path)
}

/// Full image reference of `name` inside `registry`
pub fn registry_image(registry: &RegistryNamespace, name: &str) -> String {
    let host = trim_url_scheme(&registry.reg_addr);
    if registry.namespace.is_empty() {
        format!("{}/{}", host, name)
    } else {
        format!("{}/{}/{}", host, registry.namespace, name)
    }
}

/// Moves an image into another registry, keeping its last path segment
pub fn replace_repo(image: &str, addr: &str, namespace: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    if namespace.is_empty() {
        format!("{}/{}", trim_url_scheme(addr), last)
    } else {
        format!("{}/{}/{}", trim_url_scheme(addr), namespace, last)
    }
}

/// Image name without registry, namespace or tag
pub fn image_name(image: &str) -> &str {
    let last = image.rsplit('/').next().unwrap_or(image);
    last.split(':').next().unwrap_or(last)
}
