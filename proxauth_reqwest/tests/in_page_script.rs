use boa_engine::{Context, Source};
use proxauth_reqwest::{InPageScript, ProxyOrigin};
use serde_json::{json, Value};

/// Minimal stand-ins for the browser primitives the script wraps
///
/// `fetch` and `XMLHttpRequest.send` record what would have gone out on the
/// wire in `sent`; the bridge counts how often a token was asked for.
const PAGE_PRIMITIVES: &str = r#"
var window = globalThis;
window.location = { href: "https://proxy.example/app/index.html" };

function URL(input, base) {
  var m = /^([a-z][a-z0-9+.-]*):\/\/([^\/?#]*)(.*)$/i.exec(input);
  if (!m) {
    if (base === undefined) {
      throw new TypeError("Invalid URL: " + input);
    }
    var b = new URL(base);
    var path = input.charAt(0) === "/" ? input : b.pathname.replace(/[^\/]*$/, "") + input;
    return new URL(b.protocol + "//" + b.host + path);
  }
  this.protocol = m[1].toLowerCase() + ":";
  this.host = m[2].toLowerCase();
  this.pathname = m[3] || "/";
  var defaultPort = { "http:": ":80", "https:": ":443" }[this.protocol];
  var host = this.host;
  if (defaultPort && host.endsWith(defaultPort)) {
    host = host.slice(0, -defaultPort.length);
  }
  this.origin = this.protocol + "//" + host;
  this.href = this.origin + this.pathname;
}

function Headers(init) {
  this.map = {};
  if (init instanceof Headers) {
    for (var k in init.map) {
      this.map[k] = init.map[k];
    }
  } else if (init) {
    var self = this;
    Object.keys(init).forEach(function (k) { self.map[k.toLowerCase()] = init[k]; });
  }
}
Headers.prototype.set = function (k, v) { this.map[k.toLowerCase()] = v; };
Headers.prototype.get = function (k) {
  var v = this.map[k.toLowerCase()];
  return v === undefined ? null : v;
};

function Request(url, init) {
  this.url = url;
  this.headers = new Headers(init && init.headers);
}

var sent = [];
var tokenRequests = 0;
var requestedScopes = null;
var nextToken = null;

function record(kind, url, headers) {
  sent.push({
    kind: kind,
    url: url,
    authorization: headers.get("Authorization"),
    sentinel: headers.get("X-Token-Added"),
    accept: headers.get("Accept")
  });
}

window.fetch = function (input, init) {
  var fromRequest = input instanceof Request;
  var headers = init && init.headers !== undefined
    ? new Headers(init.headers)
    : new Headers(fromRequest ? input.headers : undefined);
  record("fetch", fromRequest ? input.url : String(input), headers);
  return "response";
};

function XMLHttpRequest() {
  this.headers = new Headers();
}
XMLHttpRequest.prototype.open = function (method, url) {
  this.url = url;
};
XMLHttpRequest.prototype.setRequestHeader = function (k, v) {
  this.headers.set(k, v);
};
XMLHttpRequest.prototype.send = function (body) {
  record("xhr", String(this.url), this.headers);
};

window.ProxAuth = {
  getProxyOrigin: function () { return "https://proxy.example"; },
  getProxyScope: function () { return "https://proxy.example/user_impersonation"; },
  acquireToken: function (scopes) {
    tokenRequests += 1;
    requestedScopes = scopes;
    return nextToken;
  }
};
"#;

struct Page {
    context: Context,
}

impl Page {
    fn load(token: Option<&str>) -> Self {
        let mut context = Context::default();
        eval(&mut context, PAGE_PRIMITIVES);
        eval(
            &mut context,
            &format!("nextToken = {};", serde_json::to_string(&token).unwrap()),
        );
        Self { context }
    }

    fn inject_script(&mut self) -> &mut Self {
        let script = InPageScript::new(ProxyOrigin::parse("https://proxy.example").unwrap());
        let source = script
            .script_for("https://proxy.example/app/index.html")
            .expect("proxy pages get the script");
        eval(&mut self.context, source);
        self
    }

    fn run(&mut self, code: &str) -> Value {
        eval(&mut self.context, code);
        let state = eval(
            &mut self.context,
            "JSON.stringify({ sent: sent, tokenRequests: tokenRequests, requestedScopes: requestedScopes })",
        );
        serde_json::from_str(&state).unwrap()
    }
}

fn eval(context: &mut Context, code: &str) -> String {
    let value = context.eval(Source::from_bytes(code)).unwrap();
    value.to_string(context).unwrap().to_std_string_escaped()
}

#[test]
fn same_origin_fetches_carry_the_token_and_sentinel() {
    let state = Page::load(Some("page-token"))
        .inject_script()
        .run(r#"fetch("/api/items"); fetch("https://proxy.example/other");"#);

    assert_eq!(state["tokenRequests"], 2);
    assert_eq!(
        state["requestedScopes"],
        json!(["https://proxy.example/user_impersonation"])
    );
    for request in state["sent"].as_array().unwrap() {
        assert_eq!(request["authorization"], "Bearer page-token");
        assert_eq!(request["sentinel"], "true");
    }
}

#[test]
fn relative_urls_resolve_against_the_page() {
    let state = Page::load(Some("page-token"))
        .inject_script()
        .run(r#"fetch("data.json");"#);

    assert_eq!(state["sent"][0]["url"], "data.json");
    assert_eq!(state["sent"][0]["authorization"], "Bearer page-token");
}

#[test]
fn cross_origin_requests_are_left_alone() {
    let state = Page::load(Some("page-token"))
        .inject_script()
        .run(r#"fetch("https://cdn.example/lib.js"); fetch("http://proxy.example/insecure");"#);

    assert_eq!(state["tokenRequests"], 0);
    for request in state["sent"].as_array().unwrap() {
        assert_eq!(request["authorization"], Value::Null);
        assert_eq!(request["sentinel"], Value::Null);
    }
}

#[test]
fn requests_proceed_unmodified_without_a_token() {
    let state = Page::load(None)
        .inject_script()
        .run(r#"fetch("/api/items", { headers: { Accept: "application/json" } });"#);

    assert_eq!(state["tokenRequests"], 1);
    assert_eq!(state["sent"][0]["authorization"], Value::Null);
    assert_eq!(state["sent"][0]["sentinel"], Value::Null);
    assert_eq!(state["sent"][0]["accept"], "application/json");
}

#[test]
fn request_objects_keep_their_headers() {
    let state = Page::load(Some("page-token")).inject_script().run(
        r#"fetch(new Request("/api/items", { headers: { Accept: "application/json" } }));"#,
    );

    assert_eq!(state["sent"][0]["url"], "/api/items");
    assert_eq!(state["sent"][0]["authorization"], "Bearer page-token");
    assert_eq!(state["sent"][0]["accept"], "application/json");
}

#[test]
fn xhr_requests_carry_the_token_and_sentinel() {
    let state = Page::load(Some("page-token")).inject_script().run(
        r#"
        var xhr = new XMLHttpRequest();
        xhr.open("POST", "/api/items");
        xhr.send("{}");
        "#,
    );

    assert_eq!(state["sent"][0]["kind"], "xhr");
    assert_eq!(state["sent"][0]["authorization"], "Bearer page-token");
    assert_eq!(state["sent"][0]["sentinel"], "true");
}

#[test]
fn script_installs_only_once() {
    let state = Page::load(Some("page-token"))
        .inject_script()
        .inject_script()
        .run(r#"fetch("/api/items");"#);

    assert_eq!(state["tokenRequests"], 1);
    assert_eq!(state["sent"].as_array().unwrap().len(), 1);
}
