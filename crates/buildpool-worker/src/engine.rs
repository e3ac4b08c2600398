//! Translation of a build request into build engine invocations.

use buildpool_core::{DockerfileSource, JobId, JobRequest, PushTarget};

use crate::config::EngineConfig;
use crate::process::CommandSpec;

/// One engine invocation, with optional stdin contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub spec: CommandSpec,
    pub stdin: Option<Vec<u8>>,
}

fn base(engine: &EngineConfig, job_id: &JobId) -> CommandSpec {
    let mut spec = CommandSpec::new(engine.program.clone())
        .args(engine.args.iter().cloned())
        .cwd(engine.context_dir.clone())
        .env("BUILDPOOL_JOB_ID", job_id.as_str());
    for (key, value) in &engine.env {
        spec = spec.env(key.clone(), value.clone());
    }
    spec
}

/// The steps that run `request`: a build, then a login and a push when the
/// request names a push target. The job's output is the last step's stdout.
pub fn build_steps(engine: &EngineConfig, job_id: &JobId, request: &JobRequest) -> Vec<Step> {
    let action = &request.action;
    let options = &action.options;

    let mut build = base(engine, job_id).arg("build");
    for build_arg in &options.build_args {
        build = build.arg("--build-arg").arg(build_arg.clone());
    }
    if options.squash {
        build = build.arg("--squash");
    }
    if options.buildkit {
        build = build.env("DOCKER_BUILDKIT", "1");
    }
    if let Some(push) = &action.push_to {
        build = build.arg("--tag").arg(push.target.clone());
    }
    if let Some(source) = &request.source {
        build = build
            .env("BUILDPOOL_REPO", source.repository.clone())
            .env("BUILDPOOL_COMMITS", source.commits.join(" "));
    }
    if options.include_git {
        build = build.env("BUILDPOOL_INCLUDE_GIT", "1");
    }

    let stdin = match &action.dockerfile {
        DockerfileSource::Contents(text) => {
            build = build.arg("--file").arg("-");
            Some(text.clone().into_bytes())
        }
        DockerfileSource::Path(path) => {
            build = build.arg("--file").arg(path.clone());
            None
        }
    };
    build = build.arg(".");

    let mut steps = vec![Step {
        name: "build",
        spec: build,
        stdin,
    }];

    if let Some(push) = &action.push_to {
        steps.push(login_step(engine, job_id, push));
        steps.push(Step {
            name: "push",
            spec: base(engine, job_id).arg("push").arg(push.target.clone()),
            stdin: None,
        });
    }

    steps
}

fn login_step(engine: &EngineConfig, job_id: &JobId, push: &PushTarget) -> Step {
    let mut spec = base(engine, job_id)
        .arg("login")
        .arg("--username")
        .arg(push.user.clone())
        .arg("--password-stdin");
    if let Some(registry) = registry_host(push.repository()) {
        spec = spec.arg(registry);
    }
    Step {
        name: "login",
        spec,
        stdin: Some(push.password.clone().into_bytes()),
    }
}

/// The registry host of a repository, if it names one. `team/app` lives on
/// the default registry; `registry.example.com/team/app` does not.
fn registry_host(repository: &str) -> Option<&str> {
    let (first, _) = repository.split_once('/')?;
    if first.contains('.') || first.contains(':') || first == "localhost" {
        Some(first)
    } else {
        None
    }
}
