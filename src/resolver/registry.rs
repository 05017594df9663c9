//! Remote package registry fallback
//!
//! One GraphQL query maps a command name to its package; the package is a
//! `.tar.gz` holding exactly one `.wasm` artifact. Only WASI packages can
//! run here, so everything fetched this way is a libc-ABI module.

use super::error::{ResolveError, ResolveResult};
use super::fetch::Fetcher;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::rc::Rc;

const COMMAND_QUERY: &str = "query shellGetCommandQuery($command: String!) {
    command: getCommand(name: $command) {
        command
        module { name abi source }
        packageVersion {
            version
            package { name displayName }
            distribution { downloadUrl }
        }
    }
}";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRequest<'a> {
    operation_name: &'static str,
    query: &'static str,
    variables: Variables<'a>,
}

#[derive(Serialize)]
struct Variables<'a> {
    command: &'a str,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<ResponseData>,
}

#[derive(Deserialize)]
struct ResponseData {
    command: Option<Command>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Command {
    module: CommandModule,
    package_version: PackageVersion,
}

#[derive(Deserialize)]
struct CommandModule {
    abi: Option<String>,
}

#[derive(Deserialize)]
struct PackageVersion {
    distribution: Distribution,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Distribution {
    download_url: String,
}

/// Client for the package registry
pub struct RegistryClient {
    url: String,
    fetcher: Rc<dyn Fetcher>,
}

impl RegistryClient {
    pub fn new(url: impl Into<String>, fetcher: Rc<dyn Fetcher>) -> Self {
        Self {
            url: url.into(),
            fetcher,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Look up `name` and return the module bytes of its package
    pub async fn fetch_module(&self, name: &str) -> ResolveResult<Vec<u8>> {
        let registry_error = |reason: String| ResolveError::Registry {
            name: name.to_string(),
            reason,
        };

        let request = GraphQlRequest {
            operation_name: "shellGetCommandQuery",
            query: COMMAND_QUERY,
            variables: Variables { command: name },
        };
        let body = serde_json::to_string(&request).map_err(|e| registry_error(e.to_string()))?;

        crate::console_log!("[resolve] asking registry for {}", name);
        let response = self.fetcher.post_json(&self.url, &body).await?;
        let response: GraphQlResponse =
            serde_json::from_slice(&response).map_err(|e| registry_error(e.to_string()))?;

        let command = response
            .data
            .and_then(|data| data.command)
            .ok_or_else(|| ResolveError::NotFound {
                name: name.to_string(),
            })?;

        match command.module.abi.as_deref() {
            Some("wasi") => {}
            other => {
                return Err(ResolveError::UnsupportedAbi {
                    name: name.to_string(),
                    abi: other.unwrap_or("unknown").to_string(),
                });
            }
        }

        let url = command.package_version.distribution.download_url;
        crate::console_log!("[resolve] downloading {}", url);
        let archive = self.fetcher.get(&url).await?;
        extract_module(name, &archive)
    }
}

/// Gunzip and untar a package, returning its single `.wasm` entry
pub fn extract_module(name: &str, archive: &[u8]) -> ResolveResult<Vec<u8>> {
    let archive_error = |e: std::io::Error| ResolveError::Registry {
        name: name.to_string(),
        reason: format!("bad package archive: {}", e),
    };

    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let mut modules = Vec::new();

    for entry in tar.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let is_module = entry
            .path()
            .map_err(archive_error)?
            .extension()
            .is_some_and(|ext| ext == "wasm");
        if is_module {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(archive_error)?;
            modules.push(bytes);
        }
    }

    match modules.len() {
        0 => Err(ResolveError::NoArtifact {
            name: name.to_string(),
        }),
        1 => Ok(modules.remove(0)),
        count => Err(ResolveError::MultipleArtifacts {
            name: name.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::resolver::fetch::StaticFetcher;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use futures::executor::block_on;

    /// Build a `.tar.gz` from (path, bytes) entries
    pub(crate) fn package(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, bytes) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *bytes).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    pub(crate) fn command_response(abi: &str, url: &str) -> String {
        serde_json::json!({
            "data": {
                "command": {
                    "command": "x",
                    "module": { "name": "x", "abi": abi, "source": "x.wasm" },
                    "packageVersion": {
                        "version": "1.0.0",
                        "package": { "name": "x", "displayName": "x" },
                        "distribution": { "downloadUrl": url }
                    }
                }
            }
        })
        .to_string()
    }

    // ============ Archives ============

    #[test]
    fn test_extract_single_module() {
        let archive = package(&[("package/wapm.toml", b"[package]"), ("package/x.wasm", b"\0asm")]);
        assert_eq!(extract_module("x", &archive).unwrap(), b"\0asm");
    }

    #[test]
    fn test_extract_rejects_multiple_modules() {
        let archive = package(&[("a.wasm", b"1"), ("b.wasm", b"2")]);
        assert_eq!(
            extract_module("x", &archive).unwrap_err(),
            ResolveError::MultipleArtifacts {
                name: "x".to_string(),
                count: 2
            }
        );
    }

    #[test]
    fn test_extract_requires_a_module() {
        let archive = package(&[("README", b"hi")]);
        assert!(matches!(
            extract_module("x", &archive),
            Err(ResolveError::NoArtifact { .. })
        ));
        assert!(matches!(
            extract_module("x", b"not gzip"),
            Err(ResolveError::Registry { .. })
        ));
    }

    // ============ Queries ============

    #[test]
    fn test_fetch_module() {
        let fetcher = StaticFetcher::new()
            .with("https://reg/graphql", command_response("wasi", "https://cdn/x.tar.gz"))
            .with("https://cdn/x.tar.gz", package(&[("x.wasm", b"\0asm")]));
        let client = RegistryClient::new("https://reg/graphql", Rc::new(fetcher));
        assert_eq!(block_on(client.fetch_module("x")).unwrap(), b"\0asm");
    }

    #[test]
    fn test_fetch_module_rejects_other_abi() {
        let fetcher = StaticFetcher::new()
            .with("https://reg/graphql", command_response("emscripten", "https://cdn/x.tar.gz"));
        let client = RegistryClient::new("https://reg/graphql", Rc::new(fetcher));
        assert_eq!(
            block_on(client.fetch_module("x")).unwrap_err(),
            ResolveError::UnsupportedAbi {
                name: "x".to_string(),
                abi: "emscripten".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_command() {
        let fetcher = StaticFetcher::new().with("https://reg/graphql", r#"{"data":{"command":null}}"#);
        let client = RegistryClient::new("https://reg/graphql", Rc::new(fetcher));
        assert_eq!(
            block_on(client.fetch_module("zz")).unwrap_err(),
            ResolveError::NotFound {
                name: "zz".to_string()
            }
        );
    }

    #[test]
    fn test_request_shape() {
        let request = GraphQlRequest {
            operation_name: "shellGetCommandQuery",
            query: COMMAND_QUERY,
            variables: Variables { command: "cowsay" },
        };
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(json["operationName"], "shellGetCommandQuery");
        assert_eq!(json["variables"]["command"], "cowsay");
    }
}
