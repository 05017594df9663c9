//! Module resolution
//!
//! Turns a program name into a compiled, cached [`ModuleDescriptor`].
//! Lookup order for a name that is not cached yet:
//!
//! 1. `<bin>/<name>.bin`, with optional runtime glue in `<bin>/<name>.rt`
//! 2. `<bin>/<name>.lnk`, a text file naming another program; step 1 is
//!    repeated under that name (at most [`MAX_LINK_DEPTH`] hops)
//! 3. the package registry, when one is configured
//!
//! A module with glue, or one importing WASI, runs on the libc ABI;
//! everything else runs on the POSIX ABI. Failed resolutions are never
//! cached.

pub mod error;
pub mod fetch;
pub mod registry;

pub use error::{FetchError, FetchResult, ResolveError, ResolveResult};
pub use fetch::{Fetcher, HttpFetcher, StaticFetcher};
pub use registry::RegistryClient;

use crate::config::TermConfig;
use crate::runnable::{AbiKind, Runnable};
use crate::wasm::{CompiledModule, Engine, ModuleValidator};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Maximum number of link files followed for one name
pub const MAX_LINK_DEPTH: usize = 8;

/// A compiled module ready to run
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// Program name the module was resolved for (cache key)
    pub name: String,
    pub abi: AbiKind,
    pub module: CompiledModule,
    /// Runtime glue bytes, libc ABI only
    pub glue: Option<Vec<u8>>,
}

impl ModuleDescriptor {
    /// Bind the module to its ABI implementation
    pub fn runnable(&self, engine: &Engine) -> Runnable {
        Runnable::new(engine.clone(), self.module.clone(), self.abi, self.glue.as_deref())
    }
}

/// Servers answering unknown paths with an HTML page look like this
fn is_error_page(bytes: &[u8]) -> bool {
    bytes.first() == Some(&b'<')
}

/// Plain program names only: no paths, no whitespace
fn is_program_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
}

/// Program name -> module, cached for the lifetime of the resolver
pub struct ModuleResolver {
    bin_dir: String,
    engine: Engine,
    fetcher: Rc<dyn Fetcher>,
    registry: Option<RegistryClient>,
    cache: RefCell<HashMap<String, ModuleDescriptor>>,
}

impl ModuleResolver {
    pub fn new(config: &TermConfig, engine: Engine, fetcher: Rc<dyn Fetcher>) -> Self {
        let registry = config
            .registry_url
            .as_ref()
            .map(|url| RegistryClient::new(url.clone(), Rc::clone(&fetcher)));
        Self {
            bin_dir: config.bin_dir().to_string(),
            engine,
            fetcher,
            registry,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn url(&self, name: &str, ext: &str) -> String {
        if self.bin_dir.is_empty() {
            format!("{}.{}", name, ext)
        } else if self.bin_dir.ends_with('/') {
            format!("{}{}.{}", self.bin_dir, name, ext)
        } else {
            format!("{}/{}.{}", self.bin_dir, name, ext)
        }
    }

    /// Fetch a file that may legitimately be missing
    async fn fetch_optional(&self, url: &str) -> ResolveResult<Option<Vec<u8>>> {
        match self.fetcher.get(url).await {
            Ok(bytes) if bytes.is_empty() || is_error_page(&bytes) => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(FetchError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn compile(&self, name: &str, bytes: &[u8], glue: Option<Vec<u8>>) -> ResolveResult<ModuleDescriptor> {
        let info = ModuleValidator::inspect(bytes).map_err(|e| ResolveError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let abi = AbiKind::detect(&info, glue.as_deref());
        let module = self
            .engine
            .compile(bytes)
            .await
            .map_err(|error| ResolveError::Compile {
                name: name.to_string(),
                error,
            })?;

        Ok(ModuleDescriptor {
            name: name.to_string(),
            abi,
            module,
            glue,
        })
    }

    /// Resolve a program name, consulting the cache first
    pub async fn resolve(&self, name: &str) -> ResolveResult<ModuleDescriptor> {
        if let Some(descriptor) = self.cache.borrow().get(name) {
            return Ok(descriptor.clone());
        }
        if !is_program_name(name) {
            return Err(ResolveError::NotFound {
                name: name.to_string(),
            });
        }

        let descriptor = self.resolve_uncached(name).await?;
        crate::console_log!("[resolve] {} -> {} module", name, descriptor.abi);
        self.cache
            .borrow_mut()
            .insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    async fn resolve_uncached(&self, name: &str) -> ResolveResult<ModuleDescriptor> {
        let mut current = name.to_string();
        let mut visited = vec![current.clone()];

        loop {
            if current != name {
                if let Some(linked) = self.cache.borrow().get(&current) {
                    return Ok(ModuleDescriptor {
                        name: name.to_string(),
                        ..linked.clone()
                    });
                }
            }

            if let Some(bytes) = self.fetch_optional(&self.url(&current, "bin")).await? {
                let glue = self.fetch_optional(&self.url(&current, "rt")).await?;
                return self.compile(name, &bytes, glue).await;
            }

            let Some(link) = self.fetch_optional(&self.url(&current, "lnk")).await? else {
                break;
            };
            let target = String::from_utf8_lossy(&link).trim().to_string();
            if !is_program_name(&target) {
                return Err(ResolveError::BadLink {
                    name: name.to_string(),
                    target,
                });
            }
            if visited.contains(&target) || visited.len() > MAX_LINK_DEPTH {
                return Err(ResolveError::LinkCycle {
                    name: name.to_string(),
                });
            }
            crate::console_log!("[resolve] {} links to {}", current, target);
            visited.push(target.clone());
            current = target;
        }

        match &self.registry {
            Some(registry) => {
                let bytes = registry.fetch_module(name).await?;
                let mut descriptor = self.compile(name, &bytes, None).await?;
                // Registry packages are WASI builds even when nothing is imported
                descriptor.abi = AbiKind::Libc;
                Ok(descriptor)
            }
            None => Err(ResolveError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Add modules supplied directly as (file name, bytes) pairs
    ///
    /// `<name>.bin` becomes a module, a matching `<name>.rt` its glue.
    /// Existing cache entries are replaced. Returns the ingested names.
    pub async fn ingest(&self, files: Vec<(String, Vec<u8>)>) -> ResolveResult<Vec<String>> {
        let mut binaries = Vec::new();
        let mut glue = HashMap::new();

        for (file_name, bytes) in files {
            if let Some(name) = file_name.strip_suffix(".bin") {
                binaries.push((name.to_string(), bytes));
            } else if let Some(name) = file_name.strip_suffix(".rt") {
                glue.insert(name.to_string(), bytes);
            } else {
                crate::console_log!("[resolve] ignoring dropped file {}", file_name);
            }
        }

        let mut names = Vec::new();
        for (name, bytes) in binaries {
            let glue = glue.remove(&name).filter(|g| !g.is_empty() && !is_error_page(g));
            let descriptor = self.compile(&name, &bytes, glue).await?;
            crate::console_log!("[resolve] ingested {} ({})", name, descriptor.abi);
            self.cache.borrow_mut().insert(name.clone(), descriptor);
            names.push(name);
        }
        for name in glue.keys() {
            crate::console_log!("[resolve] runtime glue without module: {}.rt", name);
        }

        Ok(names)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cache.borrow().contains_key(name)
    }

    /// Drop a cached module; the next resolution fetches it again
    pub fn evict(&self, name: &str) -> bool {
        self.cache.borrow_mut().remove(name).is_some()
    }

    /// Cached program names, sorted
    pub fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.cache.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}
