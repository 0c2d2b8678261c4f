//! Template store: parses, renders, caches and serves language- and
//! format-keyed templates.
//!
//! Two handlebars registries are held in parallel: HTML templates get entity
//! escaping, non-HTML templates (JSON payloads) render raw. Static pages are
//! rendered once at startup and kept in-memory; dynamic pages (feature
//! pages, collection content) are rendered per request from the parsed
//! templates. Localization is realized by holding one parsed template set
//! per configured language; the language is part of the key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{json, Value};

use crate::content_negotiation::Format;

/// Identifies a renderable artifact.
///
/// Two keys are equal iff all five fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    /// Template file name, e.g. `landing.html.hbs`.
    pub name: String,
    /// Subdirectory under the templates root.
    pub directory: PathBuf,
    pub format: Format,
    /// Distinguishes multiple rendered instances of one template, e.g. one
    /// per style id. Empty for single-instance pages.
    pub instance_name: String,
    pub language: String,
}

impl TemplateKey {
    /// Key for a page in the given format; the template file is expected at
    /// `<page>.<format>.hbs`, e.g. `landing.html.hbs`.
    pub fn for_page(page: &str, format: Format) -> Self {
        Self {
            name: format!("{page}.{}.hbs", format.extension()),
            directory: PathBuf::new(),
            format,
            instance_name: String::new(),
            language: String::new(),
        }
    }

    pub fn in_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_instance(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = instance_name.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    fn registry_id(&self, language: &str) -> String {
        format!("{}/{}@{}", self.directory.display(), self.name, language)
    }
}

/// Parsed templates plus the pre-rendered payload cache.
///
/// Populated strictly before the server starts listening and read-only
/// thereafter.
pub struct TemplateStore {
    html: Handlebars<'static>,
    raw: Handlebars<'static>,
    rendered: HashMap<TemplateKey, Vec<u8>>,
    i18n: HashMap<String, Value>,
    languages: Vec<String>,
    templates_dir: PathBuf,
    site: Value,
}

impl TemplateStore {
    /// Create the store and load one i18n message bundle per language.
    pub fn new(
        templates_dir: &Path,
        i18n_dir: &Path,
        languages: &[String],
        site: Value,
    ) -> Result<Self> {
        let mut raw = Handlebars::new();
        raw.register_escape_fn(handlebars::no_escape);

        let mut i18n = HashMap::new();
        for language in languages {
            let path = i18n_dir.join(format!("{language}.yaml"));
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read message bundle {}", path.display()))?;
            let messages: Value = serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse message bundle {}", path.display()))?;
            i18n.insert(language.clone(), messages);
        }

        Ok(Self {
            html: Handlebars::new(),
            raw,
            rendered: HashMap::new(),
            i18n,
            languages: languages.to_vec(),
            templates_dir: templates_dir.to_path_buf(),
            site,
        })
    }

    /// Parse a template file and register it for every configured language.
    pub fn register(&mut self, key: &TemplateKey) -> Result<()> {
        let path = self.templates_dir.join(&key.directory).join(&key.name);
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read template {}", path.display()))?;

        let registry = match key.format {
            Format::Html => &mut self.html,
            _ => &mut self.raw,
        };
        for language in &self.languages {
            registry
                .register_template_string(&key.registry_id(language), &source)
                .with_context(|| format!("failed to parse template {}", path.display()))?;
        }
        Ok(())
    }

    /// Render a registered template with the given params.
    pub fn render<P: Serialize>(&self, key: &TemplateKey, params: &P) -> Result<Vec<u8>> {
        let language = if key.language.is_empty() {
            &self.languages[0]
        } else {
            &key.language
        };
        let registry = match key.format {
            Format::Html => &self.html,
            _ => &self.raw,
        };

        let data = json!({
            "site": self.site,
            "params": params,
            "i18n": self.i18n.get(language).cloned().unwrap_or(Value::Null),
            "language": language,
            "instance": key.instance_name,
        });

        let output = registry
            .render(&key.registry_id(language), &data)
            .with_context(|| format!("failed to render template {}", key.name))?;
        Ok(output.into_bytes())
    }

    /// Register a template and render it into the static payload cache,
    /// once per configured language (or only for the key's language when
    /// set). Returns the stored keys so the caller can validate the
    /// payloads.
    pub fn prerender<P: Serialize>(
        &mut self,
        key: TemplateKey,
        params: &P,
    ) -> Result<Vec<TemplateKey>> {
        self.register(&key)?;

        let languages = if key.language.is_empty() {
            self.languages.clone()
        } else {
            vec![key.language.clone()]
        };

        let mut stored = Vec::with_capacity(languages.len());
        for language in languages {
            let localized = key.clone().with_language(language);
            let payload = self.render(&localized, params)?;
            self.rendered.insert(localized.clone(), payload);
            stored.push(localized);
        }
        Ok(stored)
    }

    /// Look up a pre-rendered payload.
    pub fn rendered(&self, key: &TemplateKey) -> Option<&[u8]> {
        self.rendered.get(key).map(Vec::as_slice)
    }
}
