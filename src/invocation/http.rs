//! HTTP invoker: builds and executes outbound HTTP calls from config.
//!
//! The URL, each header value, and the optional body are templates parsed
//! once against the tool's input schema at construction time. When no body
//! template exists and the method permits one, a JSON body is synthesized
//! from the schema properties the URL and header templates did not consume.

use {
    super::{Invoker, InvokerEnv, InvokerFactory, Primitive, ToolResult, ValidationEnv},
    crate::{
        binder::bind_arguments,
        config::ClientTlsConfig,
        context::RequestContext,
        error::{McpError, McpResult},
        template::{SourceRegistry, Template, TemplateBuilder, BODY_VARIABLE},
    },
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    std::collections::{BTreeMap, BTreeSet},
    std::sync::Arc,
    tracing::{debug, warn},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HttpMethod {
    #[default]
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "PATCH")]
    Patch,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }

    fn allows_body(self) -> bool {
        matches!(self, HttpMethod::Put | HttpMethod::Post | HttpMethod::Patch)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpInvocationConfig {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Response headers to surface on the tool result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub echo_headers: Vec<String>,
}

impl HttpInvocationConfig {
    pub fn from_raw(raw: &Value) -> McpResult<Self> {
        serde_json::from_value(raw.clone())
            .map_err(|e| McpError::Validation(format!("http invocation config: {e}")))
    }

    fn parse_templates(
        &self,
        schema: &Value,
        sources: &SourceRegistry,
    ) -> McpResult<ParsedHttpTemplates> {
        let url = Template::parse(&self.url, schema, sources)?;
        let mut headers = Vec::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            headers.push((name.clone(), Template::parse(value, schema, sources)?));
        }
        let body = self
            .body
            .as_deref()
            .map(|text| Template::parse(text, schema, sources))
            .transpose()?;
        Ok(ParsedHttpTemplates { url, headers, body })
    }
}

struct ParsedHttpTemplates {
    url: Template,
    headers: Vec<(String, Template)>,
    body: Option<Template>,
}

impl ParsedHttpTemplates {
    /// Top-level schema properties consumed by the URL and header templates.
    /// These stay out of any synthesized request body.
    fn consumed_properties(&self) -> BTreeSet<String> {
        self.url
            .param_paths()
            .into_iter()
            .chain(
                self.headers
                    .iter()
                    .flat_map(|(_, template)| template.param_paths()),
            )
            .map(|path| top_level_name(&path))
            .collect()
    }
}

fn top_level_name(path: &str) -> String {
    path.split(['.', '[']).next().unwrap_or(path).to_string()
}

pub struct HttpInvoker {
    tool: String,
    method: HttpMethod,
    templates: ParsedHttpTemplates,
    consumed: BTreeSet<String>,
    echo_headers: Vec<String>,
    schema: Value,
    sources: SourceRegistry,
    client: reqwest::Client,
}

#[async_trait::async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(&self, arguments: &Value, ctx: &RequestContext) -> McpResult<ToolResult> {
        let resolvers = self.sources.resolvers_for(ctx);
        let mut url_builder = self.templates.url.builder(resolvers.clone());
        let mut header_builders: Vec<TemplateBuilder<'_>> = self
            .templates
            .headers
            .iter()
            .map(|(_, template)| template.builder(resolvers.clone()))
            .collect();
        let mut body_builder = self
            .templates
            .body
            .as_ref()
            .map(|template| template.builder(resolvers));

        if let Some(builder) = body_builder.as_mut() {
            let raw = serde_json::to_string(arguments)?;
            builder.set_field(BODY_VARIABLE, &Value::String(raw))?;
        }

        {
            let mut builders: Vec<&mut TemplateBuilder<'_>> = Vec::new();
            builders.push(&mut url_builder);
            builders.extend(header_builders.iter_mut());
            if let Some(builder) = body_builder.as_mut() {
                builders.push(builder);
            }
            bind_arguments(&self.schema, arguments, &mut builders)?;
        }

        let url = url_builder.get_result()?;
        ctx.logger
            .debug(&format!("invoking {} {url}", method_name(self.method)));

        let mut request = self.client.request(self.method.as_reqwest(), url.as_str());
        for ((name, _), builder) in self.templates.headers.iter().zip(&header_builders) {
            request = request.header(name.as_str(), builder.get_result()?);
        }

        if let Some(builder) = &body_builder {
            request = request.body(builder.get_result()?);
        } else if self.method.allows_body() {
            if let Some(body) = self.synthesize_body(arguments) {
                request = request.json(&body);
            }
        }

        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(McpError::Cancelled),
            response = request.send() => response.map_err(|e| {
                warn!(tool = %self.tool, error = %e, "outbound HTTP call failed");
                McpError::Invocation(format!("outbound request failed: {e}"))
            })?,
        };

        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.contains("application/json"))
            .unwrap_or(false);
        let echoed: BTreeMap<String, String> = self
            .echo_headers
            .iter()
            .filter_map(|name| {
                response
                    .headers()
                    .get(name.as_str())
                    .and_then(|value| value.to_str().ok())
                    .map(|value| (name.to_ascii_lowercase(), value.to_string()))
            })
            .collect();

        let body = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(McpError::Cancelled),
            body = response.text() => body.map_err(|e| {
                McpError::Invocation(format!("reading response body failed: {e}"))
            })?,
        };

        debug!(tool = %self.tool, status = status.as_u16(), bytes = body.len(), "backend responded");

        if status.is_redirection() {
            let target = location.unwrap_or_default();
            return Ok(ToolResult::text(format!(
                "{} redirect to {target}",
                status.as_u16()
            ))
            .with_headers(echoed));
        }
        if !status.is_success() {
            return Ok(ToolResult::error(if body.is_empty() {
                format!("backend returned status {}", status.as_u16())
            } else {
                body
            })
            .with_headers(echoed));
        }

        let text = if is_json {
            serde_json::from_str::<Value>(&body)
                .and_then(|value| serde_json::to_string_pretty(&value))
                .unwrap_or(body)
        } else {
            body
        };
        Ok(ToolResult::text(text).with_headers(echoed))
    }
}

impl HttpInvoker {
    /// JSON-encode every top-level schema property present in the arguments
    /// that no URL or header template consumed.
    fn synthesize_body(&self, arguments: &Value) -> Option<Map<String, Value>> {
        let object = arguments.as_object()?;
        let properties = self.schema.get("properties")?.as_object()?;
        let body: Map<String, Value> = object
            .iter()
            .filter(|(name, _)| properties.contains_key(*name) && !self.consumed.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if body.is_empty() {
            None
        } else {
            Some(body)
        }
    }
}

fn method_name(method: HttpMethod) -> &'static str {
    match method {
        HttpMethod::Get => "GET",
        HttpMethod::Put => "PUT",
        HttpMethod::Post => "POST",
        HttpMethod::Delete => "DELETE",
        HttpMethod::Patch => "PATCH",
    }
}

pub struct HttpInvokerFactory;

impl InvokerFactory for HttpInvokerFactory {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn validate_config(
        &self,
        raw: &Value,
        primitive: &Primitive<'_>,
        env: &ValidationEnv<'_>,
    ) -> McpResult<()> {
        let config = HttpInvocationConfig::from_raw(raw)?;
        if config.url.is_empty() {
            return Err(McpError::Validation(format!(
                "tool {:?}: http invocation requires a url",
                primitive.name
            )));
        }
        config.parse_templates(primitive.input_schema, env.sources)?;
        Ok(())
    }

    fn create_invoker(
        &self,
        raw: &Value,
        primitive: &Primitive<'_>,
        env: &InvokerEnv,
    ) -> McpResult<Arc<dyn Invoker>> {
        let config = HttpInvocationConfig::from_raw(raw)?;
        let templates = config.parse_templates(primitive.input_schema, &env.sources)?;
        let consumed = templates.consumed_properties();
        Ok(Arc::new(HttpInvoker {
            tool: primitive.name.to_string(),
            method: config.method,
            templates,
            consumed,
            echo_headers: config.echo_headers,
            schema: primitive.input_schema.clone(),
            sources: env.sources.clone(),
            client: env.http.clone(),
        }))
    }

    fn resolve_patches(
        &self,
        base: &Value,
        remove: Option<&Value>,
        extend: Option<&Value>,
        override_: Option<&Value>,
    ) -> McpResult<Value> {
        let mut config = HttpInvocationConfig::from_raw(base)?;
        apply_patch(remove, |field, value| config.apply_remove(field, value))?;
        apply_patch(extend, |field, value| config.apply_extend(field, value))?;
        apply_patch(override_, |field, value| config.apply_override(field, value))?;
        Ok(serde_json::to_value(&config)?)
    }
}

/// Run `apply` over every top-level field of a patch object. The `remove`
/// patch also accepts a bare array of field names.
pub(super) fn apply_patch(
    patch: Option<&Value>,
    mut apply: impl FnMut(&str, &Value) -> McpResult<()>,
) -> McpResult<()> {
    let Some(patch) = patch else {
        return Ok(());
    };
    match patch {
        Value::Object(object) => {
            for (field, value) in object {
                apply(field, value)?;
            }
            Ok(())
        }
        Value::Array(fields) => {
            for field in fields {
                let name = field.as_str().ok_or_else(|| {
                    McpError::Validation("patch field names must be strings".to_string())
                })?;
                apply(name, &Value::Null)?;
            }
            Ok(())
        }
        _ => Err(McpError::Validation(
            "patch must be an object or an array of field names".to_string(),
        )),
    }
}

/// Delete keys listed either as `["k1", "k2"]` or `{"k1": "", "k2": ""}`.
pub(super) fn remove_map_keys(
    map: &mut BTreeMap<String, String>,
    value: &Value,
    field: &str,
) -> McpResult<()> {
    match value {
        Value::Array(keys) => {
            for key in keys {
                let key = key.as_str().ok_or_else(|| {
                    McpError::Validation(format!("remove.{field} entries must be strings"))
                })?;
                map.remove(key);
            }
            Ok(())
        }
        Value::Object(keys) => {
            for key in keys.keys() {
                map.remove(key);
            }
            Ok(())
        }
        Value::Null => {
            map.clear();
            Ok(())
        }
        _ => Err(McpError::Validation(format!(
            "remove.{field} must list keys as an array or object"
        ))),
    }
}

pub(super) fn merge_map(
    map: &mut BTreeMap<String, String>,
    value: &Value,
    field: &str,
) -> McpResult<()> {
    let object = value.as_object().ok_or_else(|| {
        McpError::Validation(format!("extend.{field} must be a string mapping"))
    })?;
    for (key, entry) in object {
        let entry = entry.as_str().ok_or_else(|| {
            McpError::Validation(format!("extend.{field}.{key} must be a string"))
        })?;
        map.insert(key.clone(), entry.to_string());
    }
    Ok(())
}

fn string_field(value: &Value, context: &str) -> McpResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| McpError::Validation(format!("{context} must be a string")))
}

impl HttpInvocationConfig {
    fn apply_remove(&mut self, field: &str, value: &Value) -> McpResult<()> {
        match field {
            "method" => self.method = HttpMethod::default(),
            "url" => self.url.clear(),
            "headers" => remove_map_keys(&mut self.headers, value, field)?,
            "body" => self.body = None,
            "echoHeaders" => match value {
                Value::Array(names) => {
                    let names: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
                    self.echo_headers.retain(|name| !names.contains(&name.as_str()));
                }
                Value::Null => self.echo_headers.clear(),
                _ => {
                    return Err(McpError::Validation(
                        "remove.echoHeaders must list header names".to_string(),
                    ))
                }
            },
            other => return unknown_patch_field("http", other),
        }
        Ok(())
    }

    fn apply_extend(&mut self, field: &str, value: &Value) -> McpResult<()> {
        match field {
            "url" => self.url.push_str(&string_field(value, "extend.url")?),
            "headers" => merge_map(&mut self.headers, value, field)?,
            "body" => {
                let suffix = string_field(value, "extend.body")?;
                match self.body.as_mut() {
                    Some(body) => body.push_str(&suffix),
                    None => self.body = Some(suffix),
                }
            }
            "echoHeaders" => {
                let names: Vec<String> = serde_json::from_value(value.clone())
                    .map_err(|e| McpError::Validation(format!("extend.echoHeaders: {e}")))?;
                self.echo_headers.extend(names);
            }
            "method" => {
                return Err(McpError::Validation(
                    "extend.method is not supported, use override".to_string(),
                ))
            }
            other => return unknown_patch_field("http", other),
        }
        Ok(())
    }

    fn apply_override(&mut self, field: &str, value: &Value) -> McpResult<()> {
        match field {
            "method" => {
                self.method = serde_json::from_value(value.clone())
                    .map_err(|e| McpError::Validation(format!("override.method: {e}")))?;
            }
            "url" => self.url = string_field(value, "override.url")?,
            "headers" => {
                self.headers.clear();
                merge_map(&mut self.headers, value, field)?;
            }
            "body" => self.body = Some(string_field(value, "override.body")?),
            "echoHeaders" => {
                self.echo_headers = serde_json::from_value(value.clone())
                    .map_err(|e| McpError::Validation(format!("override.echoHeaders: {e}")))?;
            }
            other => return unknown_patch_field("http", other),
        }
        Ok(())
    }
}

pub(super) fn unknown_patch_field(kind: &str, field: &str) -> McpResult<()> {
    Err(McpError::Validation(format!(
        "{kind} invocation has no field {field:?}"
    )))
}

/// Build the process-wide outbound client honoring `clientTlsConfig`.
/// Redirects are never followed implicitly; the invoker reports 3xx
/// responses with their target location instead.
pub fn build_http_client(tls: Option<&ClientTlsConfig>) -> McpResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());

    if let Some(tls) = tls {
        if tls.insecure_skip_verify {
            warn!("client TLS verification disabled by configuration");
            builder = builder.danger_accept_invalid_certs(true);
        }
        for file in &tls.ca_cert_files {
            builder = builder.add_root_certificate(load_certificate(file)?);
        }
        if let Some(dir) = &tls.ca_cert_dir {
            for entry in std::fs::read_dir(dir)
                .map_err(|e| McpError::ConfigParse(format!("reading caCertDir {dir:?}: {e}")))?
            {
                let path = entry
                    .map_err(|e| McpError::ConfigParse(format!("reading caCertDir {dir:?}: {e}")))?
                    .path();
                let is_cert = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| matches!(ext, "pem" | "crt"));
                if is_cert {
                    builder = builder.add_root_certificate(load_certificate(
                        path.to_str().unwrap_or_default(),
                    )?);
                }
            }
        }
    }

    builder
        .build()
        .map_err(|e| McpError::ConfigParse(format!("building HTTP client: {e}")))
}

fn load_certificate(path: &str) -> McpResult<reqwest::Certificate> {
    let pem = std::fs::read(path)
        .map_err(|e| McpError::ConfigParse(format!("reading CA certificate {path:?}: {e}")))?;
    reqwest::Certificate::from_pem(&pem)
        .map_err(|e| McpError::ConfigParse(format!("parsing CA certificate {path:?}: {e}")))
}
