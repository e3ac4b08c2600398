//! Turning `buildpool submit` arguments into a build request.

use std::path::PathBuf;

use clap::Args;

use buildpool_core::{
    BuildAction, BuildOptions, DockerfileSource, GitSource, JobRequest, PushTarget,
};

use crate::error::CliError;

#[derive(Args, Debug, Default)]
pub struct SubmitArgs {
    /// Target pool
    #[arg(short, long)]
    pub pool: String,

    /// Local Dockerfile, sent with the request
    #[arg(short = 'f', long, conflicts_with = "dockerfile_path")]
    pub file: Option<PathBuf>,

    /// Dockerfile path inside the build context
    #[arg(long = "dockerfile-path")]
    pub dockerfile_path: Option<String>,

    /// Git repository to build from
    #[arg(long)]
    pub repo: Option<String>,

    /// Commit to merge into the build context; repeatable
    #[arg(long = "commit")]
    pub commits: Vec<String>,

    /// Key for routing to a worker with a warm cache
    #[arg(long, default_value = "")]
    pub cache_hint: String,

    /// Queue ahead of normal jobs
    #[arg(long)]
    pub urgent: bool,

    /// Safe to run again if its worker disconnects
    #[arg(long)]
    pub idempotent: bool,

    /// KEY=VALUE build argument; repeatable
    #[arg(long = "build-arg")]
    pub build_args: Vec<String>,

    #[arg(long)]
    pub squash: bool,

    #[arg(long)]
    pub buildkit: bool,

    /// Keep .git in the build context
    #[arg(long)]
    pub include_git: bool,

    /// Image reference to push the result to
    #[arg(long, requires = "push_user")]
    pub push: Option<String>,

    #[arg(long)]
    pub push_user: Option<String>,

    #[arg(long, env = "BUILDPOOL_PUSH_PASSWORD", hide_env_values = true, default_value = "")]
    pub push_password: String,

    /// Print the job id and exit without waiting
    #[arg(short, long)]
    pub detach: bool,
}

impl SubmitArgs {
    pub fn to_request(&self) -> Result<JobRequest, CliError> {
        let dockerfile = match (&self.file, &self.dockerfile_path) {
            (Some(file), _) => {
                let text = std::fs::read_to_string(file).map_err(|source| CliError::ReadFile {
                    path: file.clone(),
                    source,
                })?;
                DockerfileSource::Contents(text)
            }
            (None, Some(path)) => DockerfileSource::Path(path.clone()),
            (None, None) => DockerfileSource::Path("Dockerfile".to_string()),
        };

        let mut action = BuildAction::new(dockerfile).with_options(BuildOptions {
            build_args: self.build_args.clone(),
            squash: self.squash,
            buildkit: self.buildkit,
            include_git: self.include_git,
        });
        if let Some(target) = &self.push {
            let user = self.push_user.clone().unwrap_or_default();
            action = action.with_push_to(PushTarget::new(
                target.clone(),
                user,
                self.push_password.clone(),
            ));
        }

        let mut request = JobRequest::new(self.pool.clone(), action)
            .with_cache_hint(self.cache_hint.clone());
        if let Some(source) = GitSource::from_parts(self.repo.clone(), self.commits.clone())? {
            request = request.with_source(source);
        }
        if self.urgent {
            request = request.urgent();
        }
        if self.idempotent {
            request = request.idempotent();
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildpool_core::Priority;

    fn args(pool: &str) -> SubmitArgs {
        SubmitArgs {
            pool: pool.to_string(),
            ..SubmitArgs::default()
        }
    }

    #[test]
    fn test_defaults_to_context_dockerfile() {
        let request = args("linux").to_request().unwrap();
        assert_eq!(request.pool, "linux");
        assert_eq!(
            request.action.dockerfile,
            DockerfileSource::Path("Dockerfile".into())
        );
        assert_eq!(request.priority(), Priority::Normal);
        assert!(request.source.is_none());
        assert!(request.action.push_to.is_none());
    }

    #[test]
    fn test_full_request() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Dockerfile");
        std::fs::write(&file, "FROM alpine\n").unwrap();

        let request = SubmitArgs {
            file: Some(file),
            repo: Some("https://git.example.com/app.git".into()),
            commits: vec!["abc".into()],
            cache_hint: "app-main".into(),
            urgent: true,
            idempotent: true,
            build_args: vec!["V=1".into()],
            buildkit: true,
            push: Some("registry.example.com/team/app:1".into()),
            push_user: Some("bot".into()),
            push_password: "pw".into(),
            ..args("linux")
        }
        .to_request()
        .unwrap();

        assert_eq!(
            request.action.dockerfile,
            DockerfileSource::Contents("FROM alpine\n".into())
        );
        assert_eq!(request.priority(), Priority::Urgent);
        assert!(request.idempotent);
        assert_eq!(request.cache_hint, "app-main");
        assert_eq!(request.source.as_ref().unwrap().commits, vec!["abc".to_string()]);
        assert!(request.action.options.buildkit);
        assert_eq!(request.action.options.build_args, vec!["V=1".to_string()]);
        assert_eq!(
            request.push_repository(),
            Some("registry.example.com/team/app")
        );
    }

    #[test]
    fn test_repo_without_commits_is_user_error() {
        let err = SubmitArgs {
            repo: Some("https://git.example.com/app.git".into()),
            ..args("linux")
        }
        .to_request()
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let err = SubmitArgs {
            commits: vec!["abc".into()],
            ..args("linux")
        }
        .to_request()
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_local_file() {
        let err = SubmitArgs {
            file: Some(PathBuf::from("/nonexistent/Dockerfile")),
            ..args("linux")
        }
        .to_request()
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/Dockerfile"));
        assert_eq!(err.exit_code(), 2);
    }
}
