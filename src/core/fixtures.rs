//! Test fixtures: configuration and synthetic containers

use std::collections::HashMap;

use crate::core::config::Config;
use crate::core::container::{Container, ContainerSnapshot, Mount, MountKind};

pub const TEST_IMAGE: &str = "zettaio/restic-compose-backup:0.7";

pub fn test_config() -> Config {
    let vars: HashMap<String, String> = [
        ("RESTIC_REPOSITORY", "/restic_data"),
        ("RESTIC_PASSWORD", "password"),
        ("HOSTNAME", "backup000000"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Config::from_vars(&vars).expect("test config")
}

/// Builds a running compose container of project `default`
pub struct ContainerBuilder {
    snapshot: ContainerSnapshot,
}

impl ContainerBuilder {
    pub fn new(service: &str) -> Self {
        let mut labels = HashMap::new();
        labels.insert("com.docker.compose.project".to_string(), "default".to_string());
        labels.insert("com.docker.compose.service".to_string(), service.to_string());

        Self {
            snapshot: ContainerSnapshot {
                id: format!("{:0<64}", service),
                name: format!("/default_{}_1", service),
                image: format!("{}:latest", service),
                running: true,
                status: "running".to_string(),
                labels,
                env: Vec::new(),
                mounts: Vec::new(),
            },
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.snapshot.id = id.to_string();
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.snapshot.image = image.to_string();
        self
    }

    pub fn project(self, project: &str) -> Self {
        self.label("com.docker.compose.project", project)
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.snapshot.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.snapshot.env.push(format!("{}={}", key, value));
        self
    }

    pub fn bind(mut self, source: &str, destination: &str) -> Self {
        self.snapshot.mounts.push(Mount {
            kind: MountKind::Bind,
            name: None,
            source: source.to_string(),
            destination: destination.to_string(),
        });
        self
    }

    pub fn volume(mut self, name: &str, source: &str, destination: &str) -> Self {
        self.snapshot.mounts.push(Mount {
            kind: MountKind::Volume,
            name: Some(name.to_string()),
            source: source.to_string(),
            destination: destination.to_string(),
        });
        self
    }

    /// A tmpfs mount: no host source
    pub fn tmpfs(mut self, destination: &str) -> Self {
        self.snapshot.mounts.push(Mount {
            kind: MountKind::Other,
            name: None,
            source: String::new(),
            destination: destination.to_string(),
        });
        self
    }

    pub fn stopped(mut self) -> Self {
        self.snapshot.running = false;
        self.snapshot.status = "exited".to_string();
        self
    }

    pub fn build(self) -> Container {
        Container::from(self.snapshot)
    }
}

/// The backup container itself (`this`), matching `test_config()`'s hostname
pub fn backup_container() -> ContainerBuilder {
    ContainerBuilder::new("backup")
        .id(&format!("{:0<64}", "backup"))
        .image(TEST_IMAGE)
        .bind("/var/run/docker.sock", "/tmp/docker.sock")
        .env("RESTIC_REPOSITORY", "/restic_data")
}
