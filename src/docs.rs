//! OpenAPI document and the Swagger UI / ReDoc pages that render it.
//!
//! The document is built once from the router when the application is
//! built, so serving it costs a clone of a `Bytes`.

use bytes::Bytes;
use schemars::JsonSchema;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::Error;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::router::{ParamKind, Route, Router};

const OPENAPI_VERSION: &str = "3.0.2";

/// Where the generated documentation is served. `None` disables a page.
///
/// When the JSON document is disabled but a page is not, the page embeds
/// the document instead of fetching it.
#[derive(Clone, Debug)]
pub struct DocsConfig {
    pub openapi_path: Option<String>,
    pub swagger_path: Option<String>,
    pub redoc_path: Option<String>,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            openapi_path: Some("/openapi.json".to_owned()),
            swagger_path: Some("/docs".to_owned()),
            redoc_path: Some("/redoc".to_owned()),
        }
    }
}

impl DocsConfig {
    pub fn disabled() -> Self {
        Self { openapi_path: None, swagger_path: None, redoc_path: None }
    }
}

/// A named JSON schema destined for `components.schemas`.
#[derive(Clone, Debug)]
pub struct ComponentSchema {
    pub name: String,
    pub schema: Value,
    /// Nested definitions, hoisted next to the schema itself.
    pub definitions: Map<String, Value>,
}

pub(crate) fn component_schema<T: JsonSchema>() -> ComponentSchema {
    let mut schema = schemars::schema_for!(T).to_value();
    let mut definitions = Map::new();
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        if let Some(Value::Object(defs)) = obj.remove("$defs") {
            definitions = defs;
        }
    }

    rewrite_refs(&mut schema);
    definitions.values_mut().for_each(rewrite_refs);

    ComponentSchema { name: T::schema_name().into_owned(), schema, definitions }
}

fn rewrite_refs(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                match v {
                    Value::String(target) if key == "$ref" => {
                        if let Some(name) = target.strip_prefix("#/$defs/") {
                            *target = format!("#/components/schemas/{name}");
                        }
                    }
                    _ => rewrite_refs(v),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_refs),
        _ => {}
    }
}

// ── Document ──────────────────────────────────────────────────────────────────

/// Renders the OpenAPI document for `routes`.
///
/// When two routes with the same method render to the same OpenAPI path
/// (`/items/{id:int}` and `/items/{id}`), only the first is documented and
/// a warning is logged.
pub fn openapi(title: &str, version: &str, routes: &[Route]) -> Value {
    let mut paths = Map::new();
    let mut schemas = Map::new();

    for route in routes {
        let path = route.pattern().openapi_path();
        let method = route.method().as_str().to_ascii_lowercase();
        let Value::Object(item) = paths.entry(path.as_str()).or_insert_with(|| Value::Object(Map::new())) else {
            continue;
        };
        // Typed patterns that differ only in parameter types share one
        // OpenAPI path; the first registered, which also wins dispatch ties,
        // is documented.
        if item.contains_key(&method) {
            warn!(
                method = %route.method(),
                pattern = %route.pattern(),
                path = %path,
                "route shadowed in the OpenAPI document by an earlier route"
            );
            continue;
        }
        item.insert(method, operation(route, &mut schemas));
    }

    json!({
        "openapi": OPENAPI_VERSION,
        "info": { "title": title, "version": version },
        "paths": paths,
        "components": { "schemas": schemas },
    })
}

fn operation(route: &Route, schemas: &mut Map<String, Value>) -> Value {
    let meta = route.meta();
    let mut op = Map::new();

    if let Some(summary) = &meta.summary {
        op.insert("summary".into(), json!(summary));
    }
    if let Some(description) = &meta.description {
        op.insert("description".into(), json!(description));
    }
    if !meta.tags.is_empty() {
        op.insert("tags".into(), json!(meta.tags));
    }
    if meta.deprecated {
        op.insert("deprecated".into(), json!(true));
    }

    let parameters: Vec<Value> = route
        .pattern()
        .params()
        .map(|(name, kind)| {
            json!({
                "name": name,
                "in": "path",
                "required": true,
                "schema": { "type": openapi_type(kind) },
            })
        })
        .collect();
    if !parameters.is_empty() {
        op.insert("parameters".into(), json!(parameters));
    }

    if let Some(schema) = meta.request_schema.as_ref().filter(|_| route.method().has_body()) {
        op.insert(
            "requestBody".into(),
            json!({
                "required": true,
                "content": { "application/json": { "schema": register(schema, schemas) } },
            }),
        );
    }

    let mut success = json!({ "description": "Successful Response" });
    if let Some(schema) = &meta.response_schema {
        success["content"] = json!({ "application/json": { "schema": register(schema, schemas) } });
    }

    op.insert(
        "responses".into(),
        json!({
            (meta.success_status.as_str()): success,
            "422": {
                "description": "Validation Error",
                "content": { "application/json": { "schema": error_schema() } },
            },
        }),
    );

    Value::Object(op)
}

fn register(component: &ComponentSchema, schemas: &mut Map<String, Value>) -> Value {
    schemas.insert(component.name.clone(), component.schema.clone());
    for (name, def) in &component.definitions {
        schemas.entry(name.clone()).or_insert_with(|| def.clone());
    }
    json!({ "$ref": format!("#/components/schemas/{}", component.name) })
}

fn openapi_type(kind: ParamKind) -> &'static str {
    match kind {
        ParamKind::Int   => "integer",
        ParamKind::Float => "number",
        ParamKind::Str   => "string",
        ParamKind::Path  => "string",
    }
}

fn error_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "error": { "type": "string" },
            "detail": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "field": { "type": "string" },
                        "message": { "type": "string" },
                        "type": { "type": "string" },
                    },
                },
            },
        },
    })
}

// ── Pages ─────────────────────────────────────────────────────────────────────

/// How a page locates the document: by URL or embedded.
enum Source<'a> {
    Url(&'a str),
    Inline(&'a Value),
}

impl Source<'_> {
    fn script_literal(&self) -> String {
        let literal = match self {
            Source::Url(url) => Value::String((*url).to_owned()).to_string(),
            Source::Inline(doc) => doc.to_string(),
        };
        literal.replace("</", "<\\/")
    }
}

fn swagger_page(title: &str, source: &Source<'_>) -> String {
    let key = match source {
        Source::Url(_) => "url",
        Source::Inline(_) => "spec",
    };
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title} - API Documentation</title>
    <meta charset="utf-8"/>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <link rel="stylesheet" type="text/css" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = () => {{
            window.ui = SwaggerUIBundle({{
                {key}: {source},
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [SwaggerUIBundle.presets.apis, SwaggerUIBundle.SwaggerUIStandalonePreset],
            }});
        }};
    </script>
</body>
</html>
"#,
        title = escape_html(title),
        source = source.script_literal(),
    )
}

fn redoc_page(title: &str, source: &Source<'_>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title} - API Documentation</title>
    <meta charset="utf-8"/>
    <meta name="viewport" content="width=device-width, initial-scale=1">
</head>
<body>
    <div id="redoc"></div>
    <script src="https://cdn.jsdelivr.net/npm/redoc@2/bundles/redoc.standalone.js"></script>
    <script>
        Redoc.init({source}, {{ scrollYOffset: 50 }}, document.getElementById('redoc'));
    </script>
</body>
</html>
"#,
        title = escape_html(title),
        source = source.script_literal(),
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ── Mounting ──────────────────────────────────────────────────────────────────

/// Adds the enabled pages for `doc` to `router` as `GET` routes, outside
/// any router prefix.
pub(crate) fn mount(router: &mut Router, config: &DocsConfig, title: &str, doc: &Value) -> Result<(), Error> {
    let source = match &config.openapi_path {
        Some(path) => Source::Url(path),
        None => Source::Inline(doc),
    };

    let mut pages = Vec::new();
    if let Some(path) = &config.swagger_path {
        pages.push((path.clone(), Response::html(swagger_page(title, &source))));
    }
    if let Some(path) = &config.redoc_path {
        pages.push((path.clone(), Response::html(redoc_page(title, &source))));
    }
    if let Some(path) = &config.openapi_path {
        pages.push((path.clone(), Response::json(Bytes::from(serde_json::to_vec(doc)?))));
    }

    for (path, page) in pages {
        let serve = move |_req: Request| {
            let page = page.clone();
            async move { page }
        };
        router.on_root(Method::Get, &path, serve)?.summary("API documentation");
    }
    Ok(())
}
