use std::{fs, path::Path};

use tempfile::TempDir;
use testbed::{
    config, env::EnvMap, ContextResolver, Error, FileStore, MemoryPublisher, Namespace, Node,
    Request, TokenPolicy,
};

const DEV: &str = r#"
base_url: https://dev.example.com
api_base_url: ${ENV:TESTBED_IT_API:-https://api.dev.example.com}
remote_endpoints:
  android: http://device-farm.dev:4723/wd/hub
timeouts:
  explicit: 15
  page_load: 40
default_user_role: standard
credentials:
  standard:
    username: qa.standard
    password: ${ENV:TESTBED_IT_STANDARD_PASS_5C1E}
  admin:
    username: qa.admin
    password: ${ENV:TESTBED_IT_ADMIN_PASS_5C1E:-changeme}
"#;

const WEB: &str = r#"
remote_url: http://localhost:4444/wd/hub
browser: firefox
capabilities:
  browserName: firefox
  moz:firefoxOptions:
    args: [-headless]
timeouts:
  explicit: 20
  implicit: 5
"#;

const ANDROID: &str = r#"
remote_url = "http://localhost:4723"

[capabilities]
platformName = "Android"
"appium:automationName" = "UiAutomator2"
"#;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "config/environments/dev.yaml", DEV);
    write(tmp.path(), "config/drivers/web.yaml", WEB);
    write(tmp.path(), "config/drivers/android.toml", ANDROID);
    tmp
}

fn resolver(root: &Path, env: EnvMap) -> ContextResolver<FileStore, EnvMap> {
    let store = FileStore::new(
        root.join("config/environments"),
        root.join("config/drivers"),
    );
    ContextResolver::new(store, env, TokenPolicy::PerCall)
}

#[test]
fn web_context_end_to_end() {
    let tmp = project();
    let mut env = EnvMap::new();
    env.insert("TESTBED_IT_STANDARD_PASS_5C1E".into(), "s3cret".into());
    let r = resolver(tmp.path(), env);

    let ctx = r.resolve(&Request::new("dev", "web")).unwrap();

    assert_eq!(ctx.environment(), "dev");
    assert_eq!(ctx.platform(), "web");
    assert_eq!(ctx.base_url(), "https://dev.example.com");
    assert_eq!(ctx.api_base_url(), Some("https://api.dev.example.com"));
    assert_eq!(ctx.remote_url(), "http://localhost:4444/wd/hub");
    assert_eq!(ctx.browser(), "firefox");
    assert_eq!(ctx.timeouts().explicit(), 20);
    assert_eq!(ctx.timeouts().implicit(), 5);
    assert_eq!(ctx.timeouts().page_load(), 40);
    assert_eq!(ctx.selected_user().username(), Some("qa.standard"));
    assert_eq!(ctx.selected_user().password(), Some("s3cret"));
    assert_eq!(
        ctx.capabilities().to_json(),
        serde_json::json!({
            "browserName": "firefox",
            "moz:firefoxOptions": {"args": ["-headless"]},
        })
    );
}

#[test]
fn android_uses_environment_endpoint_and_toml_driver() {
    let tmp = project();
    let r = resolver(tmp.path(), EnvMap::new());

    let ctx = r
        .resolve(&Request::new("dev", "android").with_role("admin"))
        .unwrap();

    assert_eq!(ctx.remote_url(), "http://device-farm.dev:4723/wd/hub");
    assert_eq!(ctx.browser(), "chrome");
    assert_eq!(ctx.capabilities().str("platformName"), Some("Android"));
    assert_eq!(ctx.selected_user().password(), Some("changeme"));
    assert_eq!(ctx.timeouts().explicit(), 15);
}

#[test]
fn unset_required_variable_becomes_empty() {
    let tmp = project();
    let r = resolver(tmp.path(), EnvMap::new());

    let ctx = r.resolve(&Request::new("dev", "web")).unwrap();
    assert_eq!(ctx.selected_user().password(), Some(""));
}

#[test]
fn unknown_environment_reports_path() {
    let tmp = project();
    let r = resolver(tmp.path(), EnvMap::new());

    match r.resolve(&Request::new("nope", "web")) {
        Err(Error::DescriptorNotFound {
            namespace, path, ..
        }) => {
            assert_eq!(namespace, Namespace::Environment);
            assert_eq!(path, tmp.path().join("config/environments/nope.yaml"));
        }
        other => panic!("expected DescriptorNotFound, got {other:?}"),
    }
}

#[test]
fn files_are_not_reread_within_a_resolver() {
    let tmp = project();
    let r = resolver(tmp.path(), EnvMap::new());

    let first = r.resolve(&Request::new("dev", "web")).unwrap();

    // Editing the file has no effect on this resolver's cached parse.
    write(tmp.path(), "config/drivers/web.yaml", "remote_url: http://elsewhere\n");
    let second = r.resolve(&Request::new("dev", "web")).unwrap();

    assert_eq!(first, second);
    assert_eq!(r.cache().len(), 2);
}

#[test]
fn from_config_layers_dotenv_and_publishes() {
    let tmp = project();
    write(
        tmp.path(),
        "testbed.toml",
        "[layout]\ndotenv = \"secrets.env\"\n",
    );
    write(
        tmp.path(),
        "secrets.env",
        "TESTBED_IT_ADMIN_PASS_5C1E='from-dotenv'\n",
    );

    let cfg = config::load_config(None, tmp.path(), &EnvMap::new()).unwrap();
    let r = ContextResolver::from_config(&cfg, tmp.path()).unwrap();
    let mut publisher = MemoryPublisher::new();

    let ctx = r
        .resolve_and_publish(
            &Request::new("dev", "web").with_role("admin"),
            &mut publisher,
        )
        .unwrap();

    assert_eq!(ctx.selected_user().password(), Some("from-dotenv"));

    let vars = publisher.last().unwrap();
    assert_eq!(vars.str("PASSWORD"), Some("from-dotenv"));
    assert_eq!(vars.str("USERNAME"), Some("qa.admin"));
    assert_eq!(vars.get("PAGE_LOAD_TIMEOUT"), Some(&Node::int(40)));
    let selected = vars.get("SELECTED_USER").and_then(Node::as_mapping).unwrap();
    assert_eq!(selected.str("role"), Some("admin"));
    let all = vars.get("ALL_CREDENTIALS").and_then(Node::as_mapping).unwrap();
    assert_eq!(all.len(), 2);

    assert_eq!(
        r.source().names(Namespace::Platform).unwrap(),
        vec!["android".to_string(), "web".to_string()]
    );
}
