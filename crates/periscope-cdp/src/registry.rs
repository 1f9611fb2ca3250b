//! Session registry: the routing table mapping frames to targets to
//! sessions.
//!
//! Pure data structure; every method takes `&mut self` (or `&self` for
//! lookups) and the client wraps the whole registry in a single mutex. All
//! mutations are atomic with the cascading removals they imply
//! (target -> session -> frames).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use url::Url;

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// Kind of a CDP target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Page,
    Iframe,
    Worker,
    Other,
}

impl TargetKind {
    /// Parse the `type` string from `Target.targetCreated` payloads.
    pub fn from_cdp(kind: &str) -> Self {
        match kind {
            "page" => TargetKind::Page,
            "iframe" => TargetKind::Iframe,
            "worker" | "service_worker" | "shared_worker" => TargetKind::Worker,
            _ => TargetKind::Other,
        }
    }
}

/// A browser tab or out-of-process iframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInfo {
    pub target_id: String,
    pub kind: TargetKind,
    pub url: String,
    pub title: String,
    /// Currently attached session, if any.
    pub session_id: Option<String>,
}

/// An attached protocol channel to a target.
///
/// Detached sessions are tombstoned (`is_active = false`) rather than
/// silently reused, so a stale session id can still be traced back to its
/// target during recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub target_id: String,
    pub is_active: bool,
    /// CDP domains already enabled on this session.
    pub domains_enabled: HashSet<String>,
}

/// A renderer frame. Owned by exactly one target at a time; the mapping is
/// mutable (frames move targets on cross-origin navigation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInfo {
    pub frame_id: String,
    pub target_id: String,
    pub parent_frame_id: Option<String>,
    pub url: String,
    pub origin: String,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Targets, sessions, and frames with origin-indexed lookup.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    targets: HashMap<String, TargetInfo>,
    sessions: HashMap<String, SessionInfo>,
    frames: HashMap<String, FrameInfo>,
    /// parent frame id -> child frame ids.
    children: HashMap<String, Vec<String>>,
    /// origin -> target ids, so origin routing avoids linear scans.
    origins: HashMap<String, HashSet<String>>,
    /// First page target seen; its session is the root page session.
    root_target_id: Option<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Targets ------------------------------------------------------------

    pub fn add_target(&mut self, target_id: &str, kind: TargetKind, url: &str, title: &str) {
        if kind == TargetKind::Page && self.root_target_id.is_none() {
            self.root_target_id = Some(target_id.to_string());
        }

        let previous_url = self.targets.get(target_id).map(|t| t.url.clone());
        if let Some(old_url) = previous_url {
            self.unindex_origin(&old_url, target_id);
        }

        self.index_origin(url, target_id);
        let session_id = self
            .targets
            .get(target_id)
            .and_then(|t| t.session_id.clone());
        self.targets.insert(
            target_id.to_string(),
            TargetInfo {
                target_id: target_id.to_string(),
                kind,
                url: url.to_string(),
                title: title.to_string(),
                session_id,
            },
        );
    }

    /// Remove a target and cascade: its attached session (and that session's
    /// pending state, handled by the caller) and every frame it owns.
    pub fn remove_target(&mut self, target_id: &str) {
        let Some(target) = self.targets.remove(target_id) else {
            return;
        };

        self.unindex_origin(&target.url, target_id);

        if let Some(session_id) = target.session_id {
            self.sessions.remove(&session_id);
        }

        let owned: Vec<String> = self
            .frames
            .values()
            .filter(|f| f.target_id == target_id)
            .map(|f| f.frame_id.clone())
            .collect();
        for frame_id in owned {
            self.remove_frame(&frame_id);
        }

        if self.root_target_id.as_deref() == Some(target_id) {
            // Fall back to any remaining page target.
            self.root_target_id = self
                .targets
                .values()
                .find(|t| t.kind == TargetKind::Page)
                .map(|t| t.target_id.clone());
        }
    }

    pub fn target(&self, target_id: &str) -> Option<&TargetInfo> {
        self.targets.get(target_id)
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetInfo> {
        self.targets.values()
    }

    // -- Sessions -----------------------------------------------------------

    pub fn attach_session(&mut self, session_id: &str, target_id: &str) {
        self.sessions.insert(
            session_id.to_string(),
            SessionInfo {
                session_id: session_id.to_string(),
                target_id: target_id.to_string(),
                is_active: true,
                domains_enabled: HashSet::new(),
            },
        );
        if let Some(target) = self.targets.get_mut(target_id) {
            target.session_id = Some(session_id.to_string());
        }
    }

    /// Tombstone a session. The entry stays so recovery can trace the stale
    /// session id back to its target.
    pub fn detach_session(&mut self, session_id: &str) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.is_active = false;
            let target_id = session.target_id.clone();
            if let Some(target) = self.targets.get_mut(&target_id) {
                if target.session_id.as_deref() == Some(session_id) {
                    target.session_id = None;
                }
            }
        }
    }

    pub fn session(&self, session_id: &str) -> Option<&SessionInfo> {
        self.sessions.get(session_id)
    }

    pub fn session_is_active(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.is_active)
            .unwrap_or(false)
    }

    pub fn target_for_session(&self, session_id: &str) -> Option<String> {
        self.sessions
            .get(session_id)
            .map(|s| s.target_id.clone())
    }

    pub fn session_for_target(&self, target_id: &str) -> Option<String> {
        self.targets
            .get(target_id)
            .and_then(|t| t.session_id.clone())
            .filter(|sid| self.session_is_active(sid))
    }

    /// Active session of the root page target.
    pub fn root_page_session(&self) -> Option<String> {
        let root = self.root_target_id.as_deref()?;
        self.session_for_target(root)
    }

    /// Every active session attached to a page or iframe target, root page
    /// first and the rest in target-id order (stable across calls). This is
    /// the set the facade observes.
    pub fn page_sessions(&self) -> Vec<(String, TargetKind)> {
        let mut out = Vec::new();
        if let Some(root) = self.root_page_session() {
            out.push((root, TargetKind::Page));
        }

        let mut rest: Vec<&TargetInfo> = self
            .targets
            .values()
            .filter(|t| matches!(t.kind, TargetKind::Page | TargetKind::Iframe))
            .collect();
        rest.sort_by(|a, b| a.target_id.cmp(&b.target_id));

        for target in rest {
            if let Some(sid) = target
                .session_id
                .as_deref()
                .filter(|sid| self.session_is_active(sid))
            {
                if !out.iter().any(|(existing, _)| existing == sid) {
                    out.push((sid.to_string(), target.kind));
                }
            }
        }
        out
    }

    pub fn mark_domain_enabled(&mut self, session_id: &str, domain: &str) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.domains_enabled.insert(domain.to_string());
        }
    }

    pub fn is_domain_enabled(&self, session_id: &str, domain: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.domains_enabled.contains(domain))
            .unwrap_or(false)
    }

    // -- Frames -------------------------------------------------------------

    pub fn upsert_frame(
        &mut self,
        frame_id: &str,
        target_id: &str,
        parent_frame_id: Option<&str>,
        url: &str,
    ) {
        // If the frame moved away from its previous parent, unlink it.
        if let Some(old) = self.frames.get(frame_id) {
            if old.parent_frame_id.as_deref() != parent_frame_id {
                if let Some(old_parent) = &old.parent_frame_id {
                    if let Some(siblings) = self.children.get_mut(old_parent) {
                        siblings.retain(|f| f != frame_id);
                    }
                }
            }
        }

        self.frames.insert(
            frame_id.to_string(),
            FrameInfo {
                frame_id: frame_id.to_string(),
                target_id: target_id.to_string(),
                parent_frame_id: parent_frame_id.map(str::to_string),
                url: url.to_string(),
                origin: extract_origin(url),
            },
        );

        if let Some(parent) = parent_frame_id {
            let siblings = self.children.entry(parent.to_string()).or_default();
            if !siblings.iter().any(|f| f == frame_id) {
                siblings.push(frame_id.to_string());
            }
        }
    }

    /// Remove a frame and its whole subtree (explicit stack, not recursion).
    pub fn remove_frame(&mut self, frame_id: &str) {
        let mut stack = vec![frame_id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(kids) = self.children.remove(&current) {
                stack.extend(kids);
            }
            if let Some(frame) = self.frames.remove(&current) {
                if let Some(parent) = frame.parent_frame_id {
                    if let Some(siblings) = self.children.get_mut(&parent) {
                        siblings.retain(|f| f != &current);
                    }
                }
            }
        }
    }

    pub fn frame(&self, frame_id: &str) -> Option<&FrameInfo> {
        self.frames.get(frame_id)
    }

    pub fn frame_children(&self, frame_id: &str) -> &[String] {
        self.children
            .get(frame_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Session that owns the frame, following the frame -> target -> session
    /// chain.
    pub fn session_for_frame(&self, frame_id: &str) -> Option<String> {
        let frame = self.frames.get(frame_id)?;
        self.session_for_target(&frame.target_id)
    }

    /// Session of any target serving the given origin.
    pub fn session_for_origin(&self, origin: &str) -> Option<String> {
        let target_ids = self.origins.get(origin)?;
        target_ids
            .iter()
            .find_map(|tid| self.session_for_target(tid))
    }

    // -- Origin index -------------------------------------------------------

    fn index_origin(&mut self, url: &str, target_id: &str) {
        let origin = extract_origin(url);
        if origin.is_empty() {
            return;
        }
        self.origins
            .entry(origin)
            .or_default()
            .insert(target_id.to_string());
    }

    fn unindex_origin(&mut self, url: &str, target_id: &str) {
        let origin = extract_origin(url);
        if let Some(set) = self.origins.get_mut(&origin) {
            set.remove(target_id);
            if set.is_empty() {
                self.origins.remove(&origin);
            }
        }
    }
}

/// Security origin (scheme + host + explicit port) of a URL; empty string
/// when the URL does not parse.
pub fn extract_origin(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            match parsed.host_str() {
                Some(host) => match parsed.port() {
                    Some(port) => format!("{scheme}://{host}:{port}"),
                    None => format!("{scheme}://{host}"),
                },
                None => String::new(),
            }
        }
        Err(_) => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
