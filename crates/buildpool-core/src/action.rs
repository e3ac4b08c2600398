//! Build actions and submission requests.
//!
//! The scheduler never interprets a build action beyond two things: the
//! cache hint (for worker affinity) and the push target repository (for
//! push eligibility). Everything else is passed through to the worker.

use serde::{Deserialize, Serialize};

use crate::{CoreError, Priority};

/// Where the Dockerfile comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DockerfileSource {
    /// Dockerfile text supplied with the request.
    Contents(String),
    /// Path relative to the fetched build context.
    Path(String),
}

/// Options forwarded to the build engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// `KEY=VALUE` build arguments.
    #[serde(default)]
    pub build_args: Vec<String>,

    /// Squash the resulting layers.
    #[serde(default)]
    pub squash: bool,

    /// Enable BuildKit in the engine.
    #[serde(default)]
    pub buildkit: bool,

    /// Keep the `.git` directory in the build context.
    #[serde(default)]
    pub include_git: bool,
}

/// Where to push the built image, with opaque registry credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTarget {
    /// Full image reference, e.g. `registry.example.com/team/app:latest`.
    pub target: String,
    pub user: String,
    pub password: String,
}

impl PushTarget {
    pub fn new(
        target: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// The repository part of the target, without tag or digest.
    ///
    /// This is what worker allow-push lists are matched against.
    pub fn repository(&self) -> &str {
        let target = self.target.as_str();
        let target = target.split_once('@').map_or(target, |(repo, _)| repo);
        match target.rfind(':') {
            // A colon before the last '/' belongs to a registry port.
            Some(i) if !target[i..].contains('/') => &target[..i],
            _ => target,
        }
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for PushTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushTarget")
            .field("target", &self.target)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildAction {
    pub dockerfile: DockerfileSource,

    #[serde(default)]
    pub options: BuildOptions,

    #[serde(default)]
    pub push_to: Option<PushTarget>,
}

impl BuildAction {
    pub fn new(dockerfile: DockerfileSource) -> Self {
        Self {
            dockerfile,
            options: BuildOptions::default(),
            push_to: None,
        }
    }

    /// Builder method to set engine options.
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Builder method to set the push target.
    pub fn with_push_to(mut self, push_to: PushTarget) -> Self {
        self.push_to = Some(push_to);
        self
    }
}

/// Git source for the build context: a repository and the commits to merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSource {
    pub repository: String,
    pub commits: Vec<String>,
}

impl GitSource {
    /// Combine an optional repository and a commit list as given on a
    /// command line. Either both are present or neither is.
    pub fn from_parts(
        repository: Option<String>,
        commits: Vec<String>,
    ) -> Result<Option<Self>, CoreError> {
        match (repository, commits.is_empty()) {
            (None, true) => Ok(None),
            (Some(repository), false) => Ok(Some(Self {
                repository,
                commits,
            })),
            (Some(_), true) => Err(CoreError::InvalidRequest(
                "a repository was given without any commits".to_string(),
            )),
            (None, false) => Err(CoreError::InvalidRequest(
                "commits were given without a repository".to_string(),
            )),
        }
    }
}

/// A build submitted to a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Target pool name.
    pub pool: String,

    pub action: BuildAction,

    #[serde(default)]
    pub source: Option<GitSource>,

    /// Jobs sharing a hint prefer the worker that last ran that hint.
    #[serde(default)]
    pub cache_hint: String,

    /// Urgent jobs are drained before normal ones.
    #[serde(default)]
    pub urgent: bool,

    /// Safe to run again if the worker disappears mid-build.
    #[serde(default)]
    pub idempotent: bool,
}

impl JobRequest {
    pub fn new(pool: impl Into<String>, action: BuildAction) -> Self {
        Self {
            pool: pool.into(),
            action,
            source: None,
            cache_hint: String::new(),
            urgent: false,
            idempotent: false,
        }
    }

    /// Builder method to set the git source.
    pub fn with_source(mut self, source: GitSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Builder method to set the cache hint.
    pub fn with_cache_hint(mut self, hint: impl Into<String>) -> Self {
        self.cache_hint = hint.into();
        self
    }

    /// Builder method to mark the job urgent.
    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    /// Builder method to mark the job safe to retry.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn priority(&self) -> Priority {
        Priority::from_urgent(self.urgent)
    }

    /// Repository the job pushes to, if any.
    pub fn push_repository(&self) -> Option<&str> {
        self.action.push_to.as_ref().map(PushTarget::repository)
    }

    /// Reject malformed requests before they reach a queue.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.pool.is_empty() {
            return Err(CoreError::InvalidRequest("pool name is empty".to_string()));
        }
        if let Some(source) = &self.source {
            if source.repository.is_empty() {
                return Err(CoreError::InvalidRequest(
                    "source repository is empty".to_string(),
                ));
            }
            if source.commits.is_empty() {
                return Err(CoreError::InvalidRequest(
                    "a repository was given without any commits".to_string(),
                ));
            }
        }
        if let DockerfileSource::Path(path) = &self.action.dockerfile {
            if path.is_empty() {
                return Err(CoreError::InvalidRequest(
                    "dockerfile path is empty".to_string(),
                ));
            }
        }
        if let Some(push) = &self.action.push_to {
            if push.repository().is_empty() {
                return Err(CoreError::InvalidRequest(
                    "push target has no repository".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest::new(
            "linux-x86_64",
            BuildAction::new(DockerfileSource::Contents("FROM busybox".into())),
        )
    }

    #[test]
    fn test_push_repository_strips_tag_and_digest() {
        let cases = [
            ("team/app:latest", "team/app"),
            ("team/app", "team/app"),
            ("registry:5000/team/app:v1", "registry:5000/team/app"),
            ("registry:5000/team/app", "registry:5000/team/app"),
            ("team/app@sha256:abcd", "team/app"),
        ];
        for (target, repo) in cases {
            assert_eq!(PushTarget::new(target, "u", "p").repository(), repo, "{target}");
        }
    }

    #[test]
    fn test_push_target_debug_hides_password() {
        let push = PushTarget::new("team/app:latest", "bot", "hunter2");
        let debug = format!("{:?}", push);
        assert!(debug.contains("bot"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_git_source_requires_both_parts() {
        assert_eq!(GitSource::from_parts(None, vec![]).unwrap(), None);
        assert!(GitSource::from_parts(Some("https://git/repo".into()), vec!["abc".into()])
            .unwrap()
            .is_some());
        assert!(matches!(
            GitSource::from_parts(Some("https://git/repo".into()), vec![]),
            Err(CoreError::InvalidRequest(_))
        ));
        assert!(matches!(
            GitSource::from_parts(None, vec!["abc".into()]),
            Err(CoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_rejects_source_without_commits() {
        let mut req = request();
        assert!(req.validate().is_ok());

        req.source = Some(GitSource {
            repository: "https://git/repo".into(),
            commits: vec![],
        });
        assert!(matches!(req.validate(), Err(CoreError::InvalidRequest(_))));
    }

    #[test]
    fn test_priority_and_push_repository() {
        let req = request().urgent();
        assert_eq!(req.priority(), Priority::Urgent);
        assert_eq!(req.push_repository(), None);

        let mut req = request();
        req.action = req
            .action
            .with_push_to(PushTarget::new("team/app:v2", "u", "p"));
        assert_eq!(req.priority(), Priority::Normal);
        assert_eq!(req.push_repository(), Some("team/app"));
    }
}
