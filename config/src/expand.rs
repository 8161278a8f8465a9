use std::env;
use std::path::Path;

/// Values available to `${...}` placeholders in path-like settings.
#[derive(Debug, Clone, Copy)]
pub struct ExpandContext<'a> {
    /// Root of the workspace (`${workspaceFolder}`, `${workspaceRoot}`).
    pub workspace_folder: &'a Path,
    /// Workspace folder containing the active file (`${fileWorkspaceFolder}`).
    /// Falls back to `workspace_folder` when unknown.
    pub file_workspace_folder: Option<&'a Path>,
}

impl<'a> ExpandContext<'a> {
    #[must_use]
    pub fn new(workspace_folder: &'a Path) -> Self {
        Self {
            workspace_folder,
            file_workspace_folder: None,
        }
    }

    #[must_use]
    pub fn with_file_workspace(mut self, folder: Option<&'a Path>) -> Self {
        self.file_workspace_folder = folder;
        self
    }

    fn lookup(&self, var: &str) -> String {
        match var {
            "workspaceFolder" | "workspaceRoot" => self.workspace_folder.display().to_string(),
            "fileWorkspaceFolder" => self
                .file_workspace_folder
                .unwrap_or(self.workspace_folder)
                .display()
                .to_string(),
            other => env::var(other).unwrap_or_default(),
        }
    }
}

/// Expand `${name}` placeholders. Workspace names resolve from `ctx`, anything
/// else from the environment; unknown variables expand to the empty string.
/// An unterminated `${` is kept literally.
#[must_use]
pub fn expand_placeholders(value: &str, ctx: &ExpandContext<'_>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut i = 0;

    while i < value.len() {
        if value[i..].starts_with("${") {
            let start = i + 2;
            if let Some(end_rel) = value[start..].find('}') {
                let end = start + end_rel;
                let var = &value[start..end];
                if !var.is_empty() {
                    out.push_str(&ctx.lookup(var));
                }
                i = end + 1;
                continue;
            }
        }

        let Some(ch) = value[i..].chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}
