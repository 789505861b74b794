//! In-memory [`ContainerRuntime`] that records every call.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};

use anyhow::Result;

use super::{CmdOutput, ContainerRuntime, ContainerState, CreateSpec, OsFamily};

#[derive(Default)]
pub struct FakeRuntime {
    pub states: RefCell<HashMap<u32, ContainerState>>,
    pub calls: RefCell<Vec<String>>,
    /// (substring, output) pairs; first match answers an exec.
    pub rules: RefCell<Vec<(String, CmdOutput)>>,
    /// Like `rules`, but answers in order; the last answer repeats.
    pub sequences: RefCell<Vec<(String, VecDeque<CmdOutput>)>>,
    pub pushed: RefCell<BTreeMap<(u32, String), Vec<u8>>>,
    pub stdin_seen: RefCell<Vec<Vec<u8>>>,
    /// Fail `push` for targets containing this text.
    pub fail_push_on: RefCell<Option<String>>,
}

pub fn ok(stdout: &str) -> CmdOutput {
    CmdOutput {
        code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(stderr: &str) -> CmdOutput {
    CmdOutput {
        code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

impl FakeRuntime {
    pub fn with_container(id: u32, state: ContainerState) -> Self {
        let fake = Self::default();
        fake.states.borrow_mut().insert(id, state);
        fake
    }

    pub fn on(&self, needle: &str, output: CmdOutput) -> &Self {
        self.rules
            .borrow_mut()
            .push((needle.to_string(), output));
        self
    }

    pub fn on_seq(&self, needle: &str, outputs: Vec<CmdOutput>) -> &Self {
        self.sequences
            .borrow_mut()
            .push((needle.to_string(), outputs.into()));
        self
    }

    fn sequenced(&self, cmd: &str) -> Option<CmdOutput> {
        let mut sequences = self.sequences.borrow_mut();
        let (_, queue) = sequences
            .iter_mut()
            .find(|(needle, _)| cmd.contains(needle.as_str()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn execs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| c.strip_prefix("exec ").map(str::to_string))
            .collect()
    }

    pub fn pushed_text(&self, id: u32, target: &str) -> Option<String> {
        self.pushed
            .borrow()
            .get(&(id, target.to_string()))
            .map(|b| String::from_utf8_lossy(b).to_string())
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn state(&self, id: u32) -> Result<ContainerState> {
        self.calls.borrow_mut().push(format!("state {}", id));
        Ok(self
            .states
            .borrow()
            .get(&id)
            .copied()
            .unwrap_or(ContainerState::Absent))
    }

    async fn latest_template(&self, family: OsFamily) -> Result<String> {
        self.calls
            .borrow_mut()
            .push(format!("latest_template {:?}", family));
        Ok(format!("{}-fake_amd64.tar.xz", family.template_prefix()))
    }

    async fn ensure_template(&self, storage: &str, template: &str) -> Result<bool> {
        self.calls
            .borrow_mut()
            .push(format!("ensure_template {} {}", storage, template));
        Ok(true)
    }

    async fn create(&self, spec: &CreateSpec) -> Result<()> {
        self.calls.borrow_mut().push(format!("create {}", spec.id));
        self.states
            .borrow_mut()
            .insert(spec.id, ContainerState::Created);
        Ok(())
    }

    async fn attach_mount(&self, id: u32, host_path: &str, mount_path: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("mount {} {} {}", id, host_path, mount_path));
        Ok(())
    }

    async fn start(&self, id: u32) -> Result<()> {
        self.calls.borrow_mut().push(format!("start {}", id));
        self.states.borrow_mut().insert(id, ContainerState::Running);
        Ok(())
    }

    async fn exec_with_stdin(
        &self,
        _id: u32,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CmdOutput> {
        self.calls.borrow_mut().push(format!("exec {}", cmd));
        if let Some(data) = stdin {
            self.stdin_seen.borrow_mut().push(data.to_vec());
        }
        if let Some(out) = self.sequenced(cmd) {
            return Ok(out);
        }
        let rules = self.rules.borrow();
        Ok(rules
            .iter()
            .find(|(needle, _)| cmd.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| ok("")))
    }

    async fn push(&self, id: u32, content: &[u8], target: &str, _mode: Option<u32>) -> Result<()> {
        self.calls.borrow_mut().push(format!("push {} {}", id, target));
        if let Some(needle) = self.fail_push_on.borrow().as_deref() {
            if target.contains(needle) {
                anyhow::bail!("push to {} failed", target);
            }
        }
        self.pushed
            .borrow_mut()
            .insert((id, target.to_string()), content.to_vec());
        Ok(())
    }
}
