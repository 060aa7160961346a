#![allow(deprecated)] // Command::cargo_bin is deprecated in newer assert_cmd releases

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const STACK: &str = r#"
projectName: demo
region: us-east-1
frontendImage: registry.example.com/frontend:1.0
backendImage: registry.example.com/backend:1.0
mongoUri: db.example.com/app
tags:
  owner: platform
"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    /// Project with the default stack file already written
    pub fn with_stack() -> Self {
        let project = Self::new();
        project.write_stack(STACK);
        project
    }

    pub fn write_stack(&self, content: &str) {
        fs::write(self.root.path().join("stratus.yaml"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.path().join(".stratus").join("state.json")
    }

    /// `stratus` running inside the project, isolated from the caller's environment
    pub fn stratus(&self) -> Command {
        let mut cmd = Command::cargo_bin("stratus").unwrap();
        cmd.current_dir(self.path())
            .env_remove("STRATUS_CONFIG_PATH")
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1");
        cmd
    }
}
