//! Launchpad REST client: bridges the core [`Launchpad`] contract to the
//! real API at `https://api.launchpad.net/devel`.
//!
//! Wire conventions follow the service's RESTful protocol:
//! - entries are plain GETs on their canonical URLs
//! - collection searches are GETs with a `ws.op` named operation
//! - mutating named operations are form-encoded POSTs; factory operations
//!   answer `201 Created` with a `Location` header to fetch
//! - entry updates are JSON PATCHes guarded by `If-Match` ETags, retried
//!   when the service answers `412 Precondition Failed`
//!
//! Construct [`LaunchpadClient`] with [`LaunchpadClient::new_from_env`]:
//! OAuth tokens come from `LP_OAUTH_TOKEN`/`LP_OAUTH_TOKEN_SECRET`, and an
//! unset token means an anonymous session (read operations still work).

use std::collections::BTreeMap;
use std::env;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MATCH, LOCATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use charm_recipe_core::contract::{
    Build, BuildRequest, CharmRecipe, GitRef, GitRepository, Launchpad, LpError, NewCharmRecipe,
    Person, Project, RecipePatch,
};

pub const DEFAULT_API_ROOT: &str = "https://api.launchpad.net/devel";
const OAUTH_REALM: &str = "https://api.launchpad.net/";
const DEFAULT_CONSUMER_KEY: &str = "charm-recipe-sync";

const PATCH_ATTEMPTS: u32 = 5;
const PATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

struct OAuthCredentials {
    consumer_key: String,
    token: String,
    token_secret: String,
}

pub struct LaunchpadClient {
    http: reqwest::Client,
    root: String,
    credentials: Option<OAuthCredentials>,
}

impl LaunchpadClient {
    /// Build a client from the environment.
    ///
    /// `LP_API_ROOT` overrides the service root. Without both
    /// `LP_OAUTH_TOKEN` and `LP_OAUTH_TOKEN_SECRET` the session is
    /// anonymous and mutating calls will be rejected by the service.
    pub fn new_from_env() -> Result<Self, LpError> {
        dotenvy::dotenv().ok();
        let root = env::var("LP_API_ROOT").unwrap_or_else(|_| DEFAULT_API_ROOT.to_string());
        let credentials = match (env::var("LP_OAUTH_TOKEN"), env::var("LP_OAUTH_TOKEN_SECRET")) {
            (Ok(token), Ok(token_secret)) => {
                let consumer_key = env::var("LP_OAUTH_CONSUMER_KEY")
                    .unwrap_or_else(|_| DEFAULT_CONSUMER_KEY.to_string());
                info!(consumer_key = %consumer_key, "initialised authenticated launchpad session");
                Some(OAuthCredentials {
                    consumer_key,
                    token,
                    token_secret,
                })
            }
            _ => {
                warn!("LP_OAUTH_TOKEN/LP_OAUTH_TOKEN_SECRET not set, using an anonymous session");
                None
            }
        };
        Self::build(root, credentials)
    }

    /// An anonymous client against an explicit service root.
    pub fn anonymous(root: impl Into<String>) -> Result<Self, LpError> {
        Self::build(root.into(), None)
    }

    fn build(root: String, credentials: Option<OAuthCredentials>) -> Result<Self, LpError> {
        let http = reqwest::Client::builder()
            .user_agent(DEFAULT_CONSUMER_KEY)
            .build()?;
        Ok(LaunchpadClient {
            http,
            root: root.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// OAuth 1.0a PLAINTEXT authorization header, as launchpad expects it.
    fn auth_header(&self) -> Option<String> {
        let creds = self.credentials.as_ref()?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Some(format!(
            "OAuth realm=\"{realm}\", oauth_version=\"1.0\", \
             oauth_signature_method=\"PLAINTEXT\", oauth_consumer_key=\"{consumer}\", \
             oauth_token=\"{token}\", oauth_signature=\"%26{secret}\", \
             oauth_timestamp=\"{timestamp}\", oauth_nonce=\"{nonce}\"",
            realm = OAUTH_REALM,
            consumer = creds.consumer_key,
            token = creds.token,
            secret = creds.token_secret,
            timestamp = now.as_secs(),
            nonce = now.as_nanos(),
        ))
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(header) = self.auth_header() {
            builder = builder.header(reqwest::header::AUTHORIZATION, header);
        }
        builder
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, LpError> {
        let resp = self.request(Method::GET, url).send().await?;
        let resp = check_status(resp, url).await?;
        Ok(resp.json::<T>().await?)
    }

    /// GET an entry, mapping 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, LpError> {
        let resp = self.request(Method::GET, url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(resp, url).await?;
        Ok(Some(resp.json::<T>().await?))
    }

    /// GET a (possibly paginated) collection, following
    /// `next_collection_link` until exhausted.
    async fn get_collection<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, LpError> {
        let resp = self
            .request(Method::GET, url)
            .query(params)
            .send()
            .await?;
        let resp = check_status(resp, url).await?;
        let mut page: Page<T> = resp.json().await?;
        let mut entries = Vec::new();
        loop {
            entries.append(&mut page.entries);
            match page.next_collection_link.take() {
                Some(next) => page = self.get_json(&next).await?,
                None => break,
            }
        }
        Ok(entries)
    }

    /// POST a named operation, form-encoded.
    async fn post_op(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<reqwest::Response, LpError> {
        let resp = self.request(Method::POST, url).form(form).send().await?;
        check_status(resp, url).await
    }

    /// POST a factory operation: `201 Created` answers are followed to the
    /// `Location` header, anything else is parsed in place.
    async fn post_factory<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<T, LpError> {
        let resp = self.post_op(url, form).await?;
        if resp.status() == StatusCode::CREATED {
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
                .ok_or("created resource is missing a Location header")?;
            self.get_json(&location).await
        } else {
            Ok(resp.json::<T>().await?)
        }
    }

    /// PATCH an entry with a fresh `If-Match` ETag, retrying on
    /// `412 Precondition Failed` with a refetched entry.
    async fn patch_entry(&self, url: &str, body: &serde_json::Value) -> Result<(), LpError> {
        let mut attempts = 0;
        loop {
            let resp = self.request(Method::GET, url).send().await?;
            let resp = check_status(resp, url).await?;
            let etag = resp
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            resp.bytes().await?;

            let mut req = self
                .request(Method::PATCH, url)
                .header(CONTENT_TYPE, "application/json")
                .json(body);
            if let Some(etag) = &etag {
                req = req.header(IF_MATCH, etag.as_str());
            }
            let resp = req.send().await?;
            if resp.status() == StatusCode::PRECONDITION_FAILED {
                attempts += 1;
                if attempts > PATCH_ATTEMPTS {
                    return Err(format!("repeated precondition failure patching {url}").into());
                }
                info!(url = %url, attempts, "got precondition error, refetching and trying again");
                tokio::time::sleep(PATCH_RETRY_DELAY).await;
                continue;
            }
            check_status(resp, url).await?;
            return Ok(());
        }
    }
}

async fn check_status(
    resp: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, LpError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(format!("launchpad API error {status} for {url}: {body}").into())
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    entries: Vec<T>,
    next_collection_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersonEntry {
    name: String,
    self_link: String,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    name: String,
    owner_link: String,
    vcs: Option<String>,
    self_link: String,
}

#[derive(Debug, Deserialize)]
struct GitRepositoryEntry {
    unique_name: String,
    git_https_url: String,
    owner_link: String,
    #[serde(default)]
    target_default: bool,
    self_link: String,
}

impl From<GitRepositoryEntry> for GitRepository {
    fn from(entry: GitRepositoryEntry) -> Self {
        GitRepository {
            unique_name: entry.unique_name,
            git_https_url: entry.git_https_url,
            owner_link: entry.owner_link,
            target_default: entry.target_default,
            self_link: entry.self_link,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitRefEntry {
    path: String,
    commit_sha1: String,
    self_link: String,
}

#[derive(Debug, Deserialize)]
struct CodeImportEntry {
    git_repository_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CharmRecipeEntry {
    name: String,
    owner_link: String,
    project_link: String,
    git_ref_link: Option<String>,
    git_path: Option<String>,
    auto_build: bool,
    #[serde(default)]
    auto_build_channels: Option<BTreeMap<String, String>>,
    build_path: Option<String>,
    store_upload: bool,
    store_name: Option<String>,
    #[serde(default)]
    store_channels: Option<Vec<String>>,
    #[serde(default)]
    can_upload_to_store: bool,
    #[serde(default)]
    is_stale: bool,
    web_link: String,
    self_link: String,
}

impl From<CharmRecipeEntry> for CharmRecipe {
    fn from(entry: CharmRecipeEntry) -> Self {
        CharmRecipe {
            name: entry.name,
            owner_link: entry.owner_link,
            project_link: entry.project_link,
            git_ref_link: entry.git_ref_link,
            git_path: entry.git_path,
            auto_build: entry.auto_build,
            auto_build_channels: entry.auto_build_channels.unwrap_or_default(),
            build_path: entry.build_path,
            store_upload: entry.store_upload,
            store_name: entry.store_name,
            store_channels: entry.store_channels.unwrap_or_default(),
            can_upload_to_store: entry.can_upload_to_store,
            is_stale: entry.is_stale,
            web_link: entry.web_link,
            self_link: entry.self_link,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BuildEntry {
    #[serde(default)]
    arch_tag: Option<String>,
    distro_arch_series_link: Option<String>,
    buildstate: String,
    datebuilt: Option<DateTime<Utc>>,
    revision_id: Option<String>,
    store_upload_status: Option<String>,
    store_upload_revision: Option<i64>,
    store_upload_error_message: Option<String>,
    build_log_url: Option<String>,
    web_link: String,
    self_link: String,
}

impl From<BuildEntry> for Build {
    fn from(entry: BuildEntry) -> Self {
        // the canonical distro_arch_series URL ends .../<distro>/<series>/<arch>
        let mut series_name = String::new();
        let mut arch_tag = entry.arch_tag.clone().unwrap_or_default();
        if let Some(link) = &entry.distro_arch_series_link {
            let mut segments = link.trim_end_matches('/').rsplit('/');
            let link_arch = segments.next().unwrap_or_default();
            let link_series = segments.next().unwrap_or_default();
            if arch_tag.is_empty() {
                arch_tag = link_arch.to_string();
            }
            series_name = link_series.to_string();
        }
        Build {
            arch_tag,
            series_name,
            buildstate: entry.buildstate,
            datebuilt: entry.datebuilt,
            revision_id: entry.revision_id,
            store_upload_status: entry.store_upload_status,
            store_upload_revision: entry.store_upload_revision,
            store_upload_error_message: entry.store_upload_error_message,
            build_log_url: entry.build_log_url,
            web_link: entry.web_link,
            self_link: entry.self_link,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BuildRequestEntry {
    status: Option<String>,
    error_message: Option<String>,
    web_link: Option<String>,
    self_link: String,
}

#[async_trait]
impl Launchpad for LaunchpadClient {
    async fn get_team(&self, name: &str) -> Result<Person, LpError> {
        debug!(team = %name, "fetching team");
        let url = format!("{}/~{}", self.root, name);
        let entry: PersonEntry = self
            .get_optional(&url)
            .await?
            .ok_or_else(|| format!("no team in launchpad called {name:?}"))?;
        Ok(Person {
            name: entry.name,
            self_link: entry.self_link,
        })
    }

    async fn get_project(&self, name: &str) -> Result<Option<Project>, LpError> {
        debug!(project = %name, "fetching project");
        let url = format!("{}/{}", self.root, name);
        Ok(self.get_optional::<ProjectEntry>(&url).await?.map(|entry| {
            Project {
                name: entry.name,
                owner_link: entry.owner_link,
                vcs: entry.vcs,
                self_link: entry.self_link,
            }
        }))
    }

    async fn get_git_repository(
        &self,
        owner: &Person,
        project: &Project,
    ) -> Result<Option<GitRepository>, LpError> {
        debug!(project = %project.name, owner = %owner.name, "fetching git repositories for target");
        let url = format!("{}/+git", self.root);
        let repos: Vec<GitRepositoryEntry> = self
            .get_collection(
                &url,
                &[
                    ("ws.op", "getRepositories".to_string()),
                    ("target", project.self_link.clone()),
                ],
            )
            .await?;
        Ok(repos
            .into_iter()
            .find(|repo| repo.owner_link == owner.self_link)
            .map(GitRepository::from))
    }

    async fn get_git_refs(&self, repo: &GitRepository) -> Result<Vec<GitRef>, LpError> {
        debug!(repository = %repo.unique_name, "fetching git refs");
        let url = format!("{}/refs", repo.self_link);
        let refs: Vec<GitRefEntry> = self.get_collection(&url, &[]).await?;
        Ok(refs
            .into_iter()
            .map(|entry| GitRef {
                path: entry.path,
                commit_sha1: entry.commit_sha1,
                self_link: entry.self_link,
            })
            .collect())
    }

    async fn import_repository(
        &self,
        owner: &Person,
        project: &Project,
        url: &str,
    ) -> Result<GitRepository, LpError> {
        info!(
            url = %url,
            project = %project.name,
            owner = %owner.name,
            "importing git repository"
        );
        let import: CodeImportEntry = self
            .post_factory(
                &project.self_link,
                &[
                    ("ws.op", "newCodeImport".to_string()),
                    ("owner", owner.self_link.clone()),
                    ("rcs_type", "Git".to_string()),
                    ("target_rcs_type", "Git".to_string()),
                    ("url", url.to_string()),
                    ("branch_name", project.name.clone()),
                ],
            )
            .await?;
        let repo_link = import
            .git_repository_link
            .ok_or("code import did not produce a git repository")?;
        let entry: GitRepositoryEntry = self.get_json(&repo_link).await?;
        Ok(entry.into())
    }

    async fn set_default_repository(
        &self,
        project: &Project,
        repo: &GitRepository,
    ) -> Result<(), LpError> {
        info!(project = %project.name, repository = %repo.unique_name, "setting default repository");
        let url = format!("{}/+git", self.root);
        self.post_op(
            &url,
            &[
                ("ws.op", "setDefaultRepository".to_string()),
                ("target", project.self_link.clone()),
                ("repository", repo.self_link.clone()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_project_vcs_git(&self, project: &Project) -> Result<(), LpError> {
        info!(project = %project.name, "setting project vcs to Git");
        self.patch_entry(&project.self_link, &json!({ "vcs": "Git" }))
            .await
    }

    async fn get_charm_recipes(
        &self,
        owner: &Person,
        project: &Project,
    ) -> Result<Vec<CharmRecipe>, LpError> {
        // The service cannot filter by owner and project at once, so fetch
        // by owner and narrow on the project link here.
        debug!(owner = %owner.name, project = %project.name, "fetching charm recipes");
        let url = format!("{}/+charm-recipes", self.root);
        let recipes: Vec<CharmRecipeEntry> = self
            .get_collection(
                &url,
                &[
                    ("ws.op", "findByOwner".to_string()),
                    ("owner", owner.self_link.clone()),
                ],
            )
            .await?;
        let recipes: Vec<CharmRecipe> = recipes
            .into_iter()
            .filter(|recipe| recipe.project_link == project.self_link)
            .map(CharmRecipe::from)
            .collect();
        debug!(count = recipes.len(), "found charm recipes");
        Ok(recipes)
    }

    async fn create_recipe<'a>(&self, req: NewCharmRecipe<'a>) -> Result<CharmRecipe, LpError> {
        info!(recipe = %req.name, project = %req.project.name, "creating charm recipe");
        let url = format!("{}/+charm-recipes", self.root);
        let mut form = vec![
            ("ws.op", "new".to_string()),
            ("name", req.name.to_string()),
            ("owner", req.owner.self_link.clone()),
            ("project", req.project.self_link.clone()),
            ("git_ref", req.git_ref.self_link.clone()),
            ("store_name", req.store_name.to_string()),
            ("auto_build", req.auto_build.to_string()),
            ("store_upload", req.store_upload.to_string()),
        ];
        if !req.auto_build_channels.is_empty() {
            form.push((
                "auto_build_channels",
                serde_json::to_string(req.auto_build_channels)?,
            ));
        }
        if req.store_upload && !req.store_channels.is_empty() {
            form.push(("store_channels", serde_json::to_string(req.store_channels)?));
        }
        if let Some(build_path) = req.build_path {
            form.push(("build_path", build_path.to_string()));
        }
        let entry: CharmRecipeEntry = self.post_factory(&url, &form).await?;
        Ok(entry.into())
    }

    async fn update_recipe(
        &self,
        recipe: &CharmRecipe,
        patch: &RecipePatch,
    ) -> Result<CharmRecipe, LpError> {
        info!(recipe = %recipe.name, "updating charm recipe");
        let body = serde_json::to_value(patch)?;
        self.patch_entry(&recipe.self_link, &body).await?;
        let entry: CharmRecipeEntry = self.get_json(&recipe.self_link).await?;
        Ok(entry.into())
    }

    async fn delete_recipe(&self, recipe: &CharmRecipe) -> Result<(), LpError> {
        info!(recipe = %recipe.name, "deleting charm recipe");
        let resp = self
            .request(Method::DELETE, &recipe.self_link)
            .send()
            .await?;
        check_status(resp, &recipe.self_link).await?;
        Ok(())
    }

    async fn get_builds(&self, recipe: &CharmRecipe) -> Result<Vec<Build>, LpError> {
        debug!(recipe = %recipe.name, "fetching builds");
        let url = format!("{}/builds", recipe.self_link);
        let builds: Vec<BuildEntry> = self.get_collection(&url, &[]).await?;
        Ok(builds.into_iter().map(Build::from).collect())
    }

    async fn request_builds(
        &self,
        recipe: &CharmRecipe,
        channels: &BTreeMap<String, String>,
    ) -> Result<BuildRequest, LpError> {
        info!(recipe = %recipe.name, "requesting builds");
        let entry: BuildRequestEntry = self
            .post_factory(
                &recipe.self_link,
                &[
                    ("ws.op", "requestBuilds".to_string()),
                    ("channels", serde_json::to_string(channels)?),
                ],
            )
            .await?;
        Ok(BuildRequest {
            status: entry.status,
            error_message: entry.error_message,
            web_link: entry.web_link.unwrap_or_else(|| entry.self_link.clone()),
            self_link: entry.self_link,
        })
    }

    async fn begin_authorization(&self, recipe: &CharmRecipe) -> Result<String, LpError> {
        info!(recipe = %recipe.name, "beginning store authorization");
        let resp = self
            .post_op(
                &recipe.self_link,
                &[("ws.op", "beginAuthorization".to_string())],
            )
            .await?;
        Ok(resp.text().await?)
    }

    async fn complete_authorization(
        &self,
        recipe: &CharmRecipe,
        discharge_macaroon: &str,
    ) -> Result<(), LpError> {
        info!(recipe = %recipe.name, "completing store authorization");
        self.post_op(
            &recipe.self_link,
            &[
                ("ws.op", "completeAuthorization".to_string()),
                ("discharge_macaroon", discharge_macaroon.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn fetch_build_log(&self, url: &str) -> Result<String, LpError> {
        debug!(url = %url, "fetching build log");
        let resp = self.http.get(url).send().await?;
        let resp = check_status(resp, url).await?;
        Ok(resp.text().await?)
    }
}
