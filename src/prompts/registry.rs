//! Builtin prompt registry
//!
//! The static table of every configuration key the engine understands.
//! Weights order the interactive conversation: hosts first, then dataservice
//! shape, then service ports. Back-reference keys on derived service members
//! are registered disabled and hidden so they count as known keys without
//! ever being asked or set from the command line.

use crate::prompts::probes::ProbeKind;
use crate::prompts::validators::Validator;
use crate::prompts::Prompt;
use crate::store::{CONNECTORS, DATASERVICES, HOSTS, MANAGERS, REPL_SERVICES};
use crate::topology::{DEFAULT_CONN_PORT, DEFAULT_MGR_PORT, DEFAULT_THL_PORT};

/// All builtin prompts, unsorted; the pipeline orders by weight
pub fn builtin_prompts() -> Vec<Prompt> {
    let mut prompts = vec![
        // Host settings
        Prompt::group_default("host-user", "OS account used on every host", HOSTS, "user")
            .weight(-95)
            .validator(Validator::Identifier)
            .probe(ProbeKind::LocalUser, None),
        Prompt::group_default(
            "home-directory",
            "Installation directory on every host",
            HOSTS,
            "home-directory",
        )
        .weight(-94)
        .validator(Validator::AbsolutePath)
        .static_default("/opt/drover"),
        Prompt::group_default(
            "temp-directory",
            "Staging directory for deployments",
            HOSTS,
            "temp-directory",
        )
        .weight(-93)
        .validator(Validator::AbsolutePath)
        .probe(ProbeKind::LocalTempDir, Some("/tmp")),
        // Asked per host even when the user accepts remaining defaults
        Prompt::member(
            "host-address",
            "Host IP address or DNS name",
            HOSTS,
            "address",
        )
        .weight(-90)
        .validator(Validator::Hostname)
        .probe(ProbeKind::ResolveAddress, None)
        .not_defaultable(),
        // Dataservice shape
        Prompt::member(
            "dataservice-topology",
            "Dataservice topology",
            DATASERVICES,
            "topology",
        )
        .weight(-80)
        .validator(Validator::OneOf(&["master-slave", "composite"]))
        .static_default("master-slave"),
        Prompt::member(
            "dataservice-members",
            "Hosts belonging to this dataservice",
            DATASERVICES,
            "members",
        )
        .weight(-79)
        .validator(Validator::HostList)
        .list()
        .optional(),
        Prompt::member(
            "dataservice-master",
            "Master host of this dataservice",
            DATASERVICES,
            "master",
        )
        .weight(-78)
        .validator(Validator::HostList)
        .optional(),
        Prompt::member(
            "dataservice-relay-source",
            "Dataservice this one replicates from",
            DATASERVICES,
            "relay-source",
        )
        .weight(-77)
        .validator(Validator::Identifier)
        .optional(),
        Prompt::member(
            "dataservice-connectors",
            "Hosts running a connector for this dataservice",
            DATASERVICES,
            "connectors",
        )
        .weight(-76)
        .validator(Validator::HostList)
        .list()
        .optional(),
        Prompt::member(
            "dataservice-managed",
            "Run management agents for this dataservice",
            DATASERVICES,
            "managed",
        )
        .weight(-75)
        .validator(Validator::Boolean)
        .static_default("true"),
        Prompt::member(
            "composite-dataservices",
            "Dataservices aggregated by this composite",
            DATASERVICES,
            "composite-dataservices",
        )
        .weight(-74)
        .validator(Validator::HostList)
        .list()
        .optional()
        .disabled(),
        // Service ports; defaults come from the registered global defaults
        Prompt::group_default(
            "thl-port",
            "Replication history log port",
            DATASERVICES,
            "thl-port",
        )
        .weight(-70)
        .validator(Validator::Port),
        Prompt::group_default(
            "mgr-listen-port",
            "Manager listen port",
            MANAGERS,
            "mgr-listen-port",
        )
        .weight(-60)
        .validator(Validator::Port),
        Prompt::group_default(
            "conn-listen-port",
            "Connector listen port",
            CONNECTORS,
            "conn-listen-port",
        )
        .weight(-59)
        .validator(Validator::Port),
    ];

    // Back-references written by topology derivation
    for (prefix, group) in [
        ("repl", REPL_SERVICES),
        ("manager", MANAGERS),
        ("connector", CONNECTORS),
    ] {
        prompts.push(
            Prompt::member(
                &format!("{prefix}-host"),
                "Host this service runs on",
                group,
                "host",
            )
            .validator(Validator::Identifier)
            .optional()
            .disabled()
            .hidden(),
        );
        prompts.push(
            Prompt::member(
                &format!("{prefix}-dataservice"),
                "Dataservice this service belongs to",
                group,
                "dataservice",
            )
            .validator(Validator::Identifier)
            .optional()
            .disabled()
            .hidden(),
        );
    }

    prompts
}

/// Globally registered defaults, consulted before any prompt-level default
pub fn builtin_global_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("thl-port", DEFAULT_THL_PORT),
        ("mgr-listen-port", DEFAULT_MGR_PORT),
        ("conn-listen-port", DEFAULT_CONN_PORT),
    ]
}
