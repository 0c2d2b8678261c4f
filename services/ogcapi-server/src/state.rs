//! Application state: configuration, datasource, template store, OpenAPI
//! validator and the reverse proxy, wired together at startup.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use gpkg_store::{CollectionRef, FeatureDatasource, GeoPackage, GeoPackageOptions};
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::content_negotiation::Format;
use crate::handlers::core::CONFORMANCE_CLASSES;
use crate::openapi::OpenApiValidator;
use crate::proxy::ReverseProxy;
use crate::templates::{TemplateKey, TemplateStore};

type ShutdownHook = Box<dyn Fn() + Send + Sync>;

/// Shared application state. Built once before the server starts listening;
/// everything except the shutdown hook list is immutable afterwards.
pub struct AppState {
    pub config: Config,
    pub datasource: Option<Arc<dyn FeatureDatasource>>,
    pub templates: TemplateStore,
    pub openapi: OpenApiValidator,
    pub proxy: ReverseProxy,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
}

impl AppState {
    /// Initialize all components. Startup is fail-fast: a missing template,
    /// an invalid pre-rendered page or a bad GeoPackage aborts the process.
    pub async fn new(config: Config, openapi_file: Option<&Path>) -> Result<Self> {
        let openapi = OpenApiValidator::from_files(openapi_file)?;

        let site = json!({
            "title": config.title,
            "abstract": config.service_abstract,
            "baseUrl": config.base_url,
            "version": config.version,
        });
        let mut templates = TemplateStore::new(
            &config.templates_dir,
            &config.i18n_dir,
            &config.languages,
            site,
        )?;
        prerender_static_pages(&mut templates, &openapi, &config)?;
        register_dynamic_templates(&mut templates, &config)?;

        let state = Self {
            datasource: build_datasource(&config).await?,
            proxy: ReverseProxy::new(&config.base_url)?,
            config,
            templates,
            openapi,
            shutdown_hooks: Mutex::new(Vec::new()),
        };

        if let Some(datasource) = &state.datasource {
            let datasource = Arc::clone(datasource);
            state.register_shutdown_hook(move || datasource.close());
        }

        Ok(state)
    }

    pub fn register_shutdown_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.shutdown_hooks.lock().unwrap().push(Box::new(hook));
    }

    /// Run all registered hooks, once, between signal receipt and server
    /// shutdown.
    pub fn run_shutdown_hooks(&self) {
        let hooks = std::mem::take(&mut *self.shutdown_hooks.lock().unwrap());
        info!("running {} shutdown hook(s)", hooks.len());
        for hook in &hooks {
            hook();
        }
    }
}

async fn build_datasource(config: &Config) -> Result<Option<Arc<dyn FeatureDatasource>>> {
    let Some(features) = &config.ogc_api.features else {
        return Ok(None);
    };
    let Some(gpkg) = &features.datasource.geopackage else {
        return Err(anyhow!("features api enabled without a configured datasource"));
    };

    let mut options = GeoPackageOptions::new(&gpkg.path);
    options.fid_column = gpkg.fid.clone();
    options.query_timeout = gpkg.query_timeout();
    options.max_connections = gpkg.max_connections;
    options.spatialite = gpkg.spatialite;

    let collections: Vec<CollectionRef> = features
        .collections
        .iter()
        .map(|c| CollectionRef {
            id: c.id.clone(),
            datasource_id: c.datasource_id.clone(),
        })
        .collect();

    let datasource = tokio::task::spawn_blocking(move || GeoPackage::connect(options, &collections))
        .await
        .context("datasource startup task failed")?
        .context("failed to open geopackage")?;

    Ok(Some(Arc::new(datasource)))
}

/// Render the static pages into the template cache and validate every
/// payload against the OpenAPI spec using a synthetic request against the
/// canonical base URL. A validation failure aborts startup.
fn prerender_static_pages(
    templates: &mut TemplateStore,
    openapi: &OpenApiValidator,
    config: &Config,
) -> Result<()> {
    let collections_params = json!({
        "collections": config
            .all_collections()
            .iter()
            .map(|c| json!({"id": c.id, "title": c.title, "description": c.description}))
            .collect::<Vec<_>>(),
    });

    let mut pages: Vec<(TemplateKey, serde_json::Value, String)> = vec![];
    for format in [Format::Json, Format::Html] {
        pages.push((
            TemplateKey::for_page("landing", format),
            json!({}),
            "/".to_string(),
        ));
        pages.push((
            TemplateKey::for_page("conformance", format),
            json!({"conformsTo": CONFORMANCE_CLASSES}),
            "/conformance".to_string(),
        ));
        pages.push((
            TemplateKey::for_page("collections", format),
            collections_params.clone(),
            "/collections".to_string(),
        ));

        for collection in config.all_collections() {
            pages.push((
                TemplateKey::for_page("collection", format).with_instance(&collection.id),
                json!({"id": collection.id, "title": collection.title, "description": collection.description}),
                format!("/collections/{}", collection.id),
            ));
        }

        if let Some(styles) = &config.ogc_api.styles {
            pages.push((
                TemplateKey::for_page("styles", format),
                json!({"default": styles.default, "styles": styles.supported_styles}),
                "/styles".to_string(),
            ));
            for style in &styles.supported_styles {
                pages.push((
                    TemplateKey::for_page("style-metadata", format).with_instance(&style.id),
                    json!(style),
                    format!("/styles/{}/metadata", style.id),
                ));
            }
        }

        if let Some(tiles) = &config.ogc_api.tiles {
            pages.push((
                TemplateKey::for_page("tiles", format),
                json!({"types": tiles.types, "supportedSrs": tiles.supported_srs}),
                "/tiles".to_string(),
            ));
        }
    }

    // stylesheets render once, not per output format
    if let Some(styles) = &config.ogc_api.styles {
        for style in &styles.supported_styles {
            pages.push((
                TemplateKey::for_page("style", Format::Json).with_instance(&style.id),
                json!(style),
                format!("/styles/{}", style.id),
            ));
        }
    }

    for (key, params, path) in pages {
        let stored = templates.prerender(key, &params)?;
        for stored_key in stored {
            let payload = templates
                .rendered(&stored_key)
                .expect("payload was stored by prerender");
            openapi
                .validate_response(stored_key.format.media_type(), payload, &path)
                .map_err(|msg| {
                    anyhow!("validation of template {} failed: {msg}", stored_key.name)
                })?;
        }
    }

    Ok(())
}

/// Templates rendered per request still parse (and fail) at startup.
fn register_dynamic_templates(templates: &mut TemplateStore, config: &Config) -> Result<()> {
    if config.ogc_api.features.is_some() {
        templates.register(&TemplateKey::for_page("features", Format::Html))?;
        templates.register(&TemplateKey::for_page("feature", Format::Html))?;
    }
    Ok(())
}
