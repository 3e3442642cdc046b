//! Shell command templates run on target hosts.
//!
//! Every interpolated value is single-quoted, so request fields can never
//! break out of their argument position. Manifests travel base64-encoded.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use deckhand_wire::{DeployPayload, PortMapping};
use uuid::Uuid;

/// Quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Registry reference an image is tagged and pushed as
pub fn image_reference(registry: &str, name: &str, version: &str) -> String {
    let registry = registry.trim_end_matches('/');
    if registry.is_empty() {
        format!("{}:{}", name, version)
    } else {
        format!("{}/{}:{}", registry, name, version)
    }
}

/// Inputs of a build command
pub struct BuildCommand<'a> {
    pub job_id: Uuid,
    pub workdir_base: &'a str,
    pub repos_url: &'a str,
    pub branch: &'a str,
    pub dockerfile: Option<&'a str>,
    pub image_ref: &'a str,
}

impl BuildCommand<'_> {
    /// Clone, build and push, then remove the work directory whatever happened
    pub fn render(&self) -> String {
        let workdir = format!(
            "{}/{}",
            self.workdir_base.trim_end_matches('/'),
            self.job_id.simple()
        );
        let workdir = shell_quote(&workdir);
        let image = shell_quote(self.image_ref);
        let dockerfile = shell_quote(self.dockerfile.unwrap_or("Dockerfile"));

        format!(
            "rm -rf {wd} && git clone --depth 1 --branch {branch} {url} {wd} && cd {wd} \
             && docker build -t {image} -f {dockerfile} . && docker push {image}; \
             rc=$?; cd / && rm -rf {wd}; exit $rc",
            wd = workdir,
            branch = shell_quote(self.branch),
            url = shell_quote(self.repos_url),
            image = image,
            dockerfile = dockerfile,
        )
    }
}

/// Remote path a manifest is written to before `kubectl apply`
pub fn remote_manifest_path(app_name: &str, deployment_name: &str) -> String {
    format!("/tmp/deckhand/{}_{}.yaml", app_name, deployment_name)
}

/// Commands that apply `payload` under `name` on one host
pub fn apply_commands(app_name: &str, name: &str, payload: &DeployPayload) -> Vec<String> {
    match payload {
        DeployPayload::Manifest { yaml, .. } => {
            let path = shell_quote(&remote_manifest_path(app_name, name));
            vec![format!(
                "mkdir -p /tmp/deckhand && printf %s {encoded} | base64 -d > {path} \
                 && kubectl apply -f {path}",
                encoded = shell_quote(&STANDARD.encode(yaml)),
                path = path,
            )]
        }
        DeployPayload::Container { image, ports, env } => {
            let image = shell_quote(image);
            let container = shell_quote(name);
            let mut run = format!(
                "docker run -d --name {} --restart unless-stopped",
                container
            );
            for port in ports {
                run.push_str(" -p ");
                run.push_str(&port_flag(port));
            }
            for (key, value) in env {
                run.push_str(" -e ");
                run.push_str(&shell_quote(&format!("{}={}", key, value)));
            }
            run.push(' ');
            run.push_str(&image);

            vec![
                format!("docker pull {}", image),
                format!("docker rm -f {} >/dev/null 2>&1 || true", container),
                run,
            ]
        }
    }
}

fn port_flag(port: &PortMapping) -> String {
    match &port.protocol {
        Some(protocol) => shell_quote(&format!("{}:{}/{}", port.host, port.container, protocol)),
        None => format!("{}:{}", port.host, port.container),
    }
}

/// Commands that remove the object `old_name` left by an earlier deployment
pub fn delete_commands(old_name: &str, payload: &DeployPayload) -> Vec<String> {
    match payload {
        DeployPayload::Manifest { object, .. } => vec![format!(
            "kubectl delete {} {} --ignore-not-found",
            object.as_str(),
            shell_quote(old_name)
        )],
        DeployPayload::Container { .. } => {
            vec![format!("docker rm -f {}", shell_quote(old_name))]
        }
    }
}
