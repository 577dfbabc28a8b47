//! Staged-release soundness checks for the validate-commit pass
//!
//! These run between deploy and commit. They answer one question: if the
//! marker flips to this release now, does the host come up with exactly the
//! configuration the coordinator planned. Drift between staging and commit,
//! truncated writes, and hand-edited releases all surface here.

use std::fs;

use sha2::{Digest, Sha256};

use crate::report::Report;
use crate::store::{CONNECTORS, MANAGERS, REPL_SERVICES};

use super::CheckContext;

pub(crate) fn staged_configuration_fingerprint(ctx: &CheckContext, report: &mut Report) {
    let paths = ctx.paths();
    let properties = paths.installed_properties();
    let content = match fs::read(&properties) {
        Ok(content) => content,
        Err(e) => {
            report.add_error(
                "staged-configuration-fingerprint",
                format!("staged configuration missing at {}: {e}", properties.display()),
            );
            return;
        }
    };

    let actual = format!("sha256:{:x}", Sha256::digest(&content));
    let expected = &ctx.config.fingerprint;
    if actual != *expected {
        report.add_error(
            "staged-configuration-fingerprint",
            format!("staged configuration hashes to {actual}, planner expected {expected}"),
        );
        return;
    }

    let recorded = fs::read_to_string(paths.installed_fingerprint())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if recorded != *expected {
        report.add_error(
            "staged-configuration-fingerprint",
            format!("recorded fingerprint '{recorded}' does not match {expected}"),
        );
    } else {
        report.add_info(
            "staged-configuration-fingerprint",
            "staged configuration matches the planned fingerprint",
        );
    }
}

pub(crate) fn release_layout(ctx: &CheckContext, report: &mut Report) {
    let paths = ctx.paths();
    let mut missing = Vec::new();
    for required in [paths.conf_dir(), paths.services_dir()] {
        if !required.is_dir() {
            missing.push(required.display().to_string());
        }
    }
    if !paths.installed_properties().is_file() {
        missing.push(paths.installed_properties().display().to_string());
    }

    if missing.is_empty() {
        report.add_info(
            "release-layout",
            format!("release {} is complete", paths.release_name()),
        );
    } else {
        report.add_error(
            "release-layout",
            format!("release is incomplete, missing: {}", missing.join(", ")),
        );
    }
}

pub(crate) fn service_manifests(ctx: &CheckContext, report: &mut Report) {
    let config = ctx.config;
    let dir = ctx.paths().services_dir();
    let expected: usize = [REPL_SERVICES, MANAGERS, CONNECTORS]
        .iter()
        .map(|group| config.service_members(group).len())
        .sum();

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            report.add_error(
                "service-manifests",
                format!("cannot read {}: {e}", dir.display()),
            );
            return;
        }
    };

    let mut parsed = 0usize;
    let mut bad = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let manifest = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                serde_json::from_str::<crate::modules::ServiceManifest>(&raw)
                    .map_err(|e| e.to_string())
            });
        match manifest {
            Ok(manifest) => {
                if manifest.kind == "replicator" && manifest.role.is_none() {
                    report.add_error(
                        "service-manifests",
                        format!("replicator manifest {} has no role", manifest.service),
                    );
                    bad += 1;
                } else {
                    parsed += 1;
                }
            }
            Err(e) => {
                report.add_error(
                    "service-manifests",
                    format!("manifest {} is unreadable: {e}", path.display()),
                );
                bad += 1;
            }
        }
    }

    if parsed != expected {
        report.add_error(
            "service-manifests",
            format!("{parsed} valid manifests present, host runs {expected} services"),
        );
    } else if bad == 0 {
        report.add_info(
            "service-manifests",
            format!("all {parsed} service manifests are sound"),
        );
    }
}
