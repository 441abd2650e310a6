//! Language registry: toolchain profiles for compilation and execution
//!
//! Profiles are declared in `files/languages.toml` and loaded once per process.
//! Commands are argv templates; each token becomes exactly one argument after
//! placeholder substitution, so user-influenced paths never pass through a shell.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

/// Returned by [`LanguageRegistry::lookup`] when no profile matches
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Which step of the pipeline a phase represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Compile,
    Run,
}

/// An argv template such as `["g++", "{source}", "-o", "{artifact}"]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    tokens: Vec<Vec<Segment>>,
    program: String,
}

/// Piece of a token: literal text or a placeholder, split once at load time
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Workspace,
    Source,
    Artifact,
}

/// Concrete values substituted into a [`CommandTemplate`]
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub workspace: &'a Path,
    pub source: &'a Path,
    pub artifact: Option<&'a Path>,
}

impl CommandTemplate {
    fn parse(tokens: Vec<String>, has_artifact: bool) -> anyhow::Result<Self> {
        let Some(program) = tokens.first().cloned() else {
            anyhow::bail!("command must not be empty");
        };
        let mut parsed = Vec::with_capacity(tokens.len());
        for token in &tokens {
            let segments = segments_of(token)?;
            if segments.contains(&Segment::Artifact) && !has_artifact {
                anyhow::bail!("{{artifact}} used in {:?} but no artifact is declared", token);
            }
            parsed.push(segments);
        }
        Ok(Self {
            tokens: parsed,
            program,
        })
    }

    /// Program name as written in the template (before substitution)
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Substitute placeholders, producing one argv element per token.
    /// Substituted values are never scanned again.
    pub fn resolve(&self, ctx: &TemplateContext<'_>) -> Vec<String> {
        let workspace = ctx.workspace.to_string_lossy();
        let source = ctx.source.to_string_lossy();
        let artifact = ctx
            .artifact
            .map(|p| p.to_string_lossy())
            .unwrap_or_default();

        self.tokens
            .iter()
            .map(|segments| {
                segments
                    .iter()
                    .map(|segment| match segment {
                        Segment::Literal(text) => text.as_str(),
                        Segment::Workspace => &*workspace,
                        Segment::Source => &*source,
                        Segment::Artifact => &*artifact,
                    })
                    .collect()
            })
            .collect()
    }
}

/// Split a token into literal text and `{name}` placeholders
fn segments_of(token: &str) -> anyhow::Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = token;
    while let Some(start) = rest.find('{') {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| anyhow::anyhow!("unterminated placeholder in {:?}", token))?;
        segments.push(match &after[..end] {
            "workspace" => Segment::Workspace,
            "source" => Segment::Source,
            "artifact" => Segment::Artifact,
            name => anyhow::bail!("unknown placeholder {{{}}} in {:?}", name, token),
        });
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// One step of a language pipeline
#[derive(Debug, Clone)]
pub struct Phase {
    pub kind: PhaseKind,
    pub command: CommandTemplate,
}

/// Static description of how to check for and drive a language's toolchain
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    /// Canonical language id (e.g., "cpp")
    pub id: String,
    /// Name of the source file written into the workspace (e.g., "solution.cpp")
    pub source_file: String,
    /// Name of the compiled artifact, for languages that produce one
    pub artifact: Option<String>,
    /// Whether the job's stdin is written out and attached to the program
    pub accepts_stdin: bool,
    /// Cheap command whose success means the toolchain is installed
    pub probe: CommandTemplate,
    /// Ordered pipeline: `[compile, run]` or `[run]`
    pub phases: Vec<Phase>,
}

impl LanguageProfile {
    pub fn is_compiled(&self) -> bool {
        self.phases.iter().any(|p| p.kind == PhaseKind::Compile)
    }

    /// File extension of the source file, without the dot
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.source_file)
            .extension()
            .and_then(|ext| ext.to_str())
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    artifact: Option<String>,
    probe: Vec<String>,
    compile: Option<Vec<String>>,
    run: Vec<String>,
    #[serde(default = "default_accepts_stdin")]
    accepts_stdin: bool,
    #[serde(default)]
    aliases: Vec<String>,
}

fn default_accepts_stdin() -> bool {
    true
}

/// Reject anything that is not a bare file name
fn check_file_name(name: &str, what: &str, language: &str) -> anyhow::Result<()> {
    let valid = !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != "..";
    if !valid {
        anyhow::bail!("Invalid {} for {}: {:?}", what, language, name);
    }
    Ok(())
}

/// Immutable language-id → profile map
#[derive(Debug, Default)]
pub struct LanguageRegistry {
    profiles: HashMap<String, Arc<LanguageProfile>>,
    aliases: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Parse a registry from TOML text
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> =
            toml::from_str(content).context("Failed to parse language table")?;

        let mut profiles = HashMap::new();
        let mut aliases = HashMap::new();

        for (name, raw) in raw_configs {
            let id = name.to_lowercase();
            check_file_name(&raw.source_file, "source_file", &id)?;
            if let Some(artifact) = &raw.artifact {
                check_file_name(artifact, "artifact", &id)?;
            }
            let has_artifact = raw.artifact.is_some();

            let mut phases = Vec::with_capacity(2);
            if let Some(compile) = raw.compile {
                phases.push(Phase {
                    kind: PhaseKind::Compile,
                    command: CommandTemplate::parse(compile, has_artifact)
                        .with_context(|| format!("Invalid compile command for {}", id))?,
                });
            }
            phases.push(Phase {
                kind: PhaseKind::Run,
                command: CommandTemplate::parse(raw.run, has_artifact)
                    .with_context(|| format!("Invalid run command for {}", id))?,
            });

            let profile = LanguageProfile {
                id: id.clone(),
                source_file: raw.source_file,
                artifact: raw.artifact,
                accepts_stdin: raw.accepts_stdin,
                probe: CommandTemplate::parse(raw.probe, has_artifact)
                    .with_context(|| format!("Invalid probe command for {}", id))?,
                phases,
            };

            for alias in raw.aliases {
                let alias = alias.to_lowercase();
                if let Some(owner) = aliases.insert(alias.clone(), id.clone()) {
                    anyhow::bail!("Alias {} declared by both {} and {}", alias, owner, id);
                }
            }
            if profiles.insert(id.clone(), Arc::new(profile)).is_some() {
                anyhow::bail!("Language {} declared twice", id);
            }
        }

        if let Some(alias) = aliases.keys().find(|a| profiles.contains_key(*a)) {
            anyhow::bail!("Alias {} shadows a language id", alias);
        }

        Ok(Self { profiles, aliases })
    }

    /// The table compiled into the binary
    pub fn builtin() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml(content)
    }

    /// Resolve a language id or alias (case-insensitive)
    pub fn lookup(&self, language: &str) -> Result<Arc<LanguageProfile>, UnsupportedLanguage> {
        let key = language.trim().to_lowercase();
        let id = self.aliases.get(&key).unwrap_or(&key);
        self.profiles
            .get(id)
            .cloned()
            .ok_or_else(|| UnsupportedLanguage(language.to_string()))
    }

    /// Canonical language ids, sorted
    pub fn languages(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.profiles.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Global language registry
static LANGUAGES: OnceLock<Arc<LanguageRegistry>> = OnceLock::new();

/// Load the built-in language table into the process-wide registry
pub fn init_languages() -> anyhow::Result<Arc<LanguageRegistry>> {
    let registry = Arc::new(LanguageRegistry::builtin()?);
    LANGUAGES
        .set(registry.clone())
        .map_err(|_| anyhow::anyhow!("Languages already initialized"))?;
    Ok(registry)
}

/// Get the process-wide registry, if it has been initialized
pub fn registry() -> Option<Arc<LanguageRegistry>> {
    LANGUAGES.get().cloned()
}
