use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use wgvault_core::render::{render, Dialect, RenderInput};
use wgvault_core::store::ConfigStore;
use wgvault_core::sync::SyncResult;
use wgvault_core::{alloc, keys, qr, HistoryLedger, SyncEngine, WebDavClient};
use wgvault_types::{HistoryEntry, ServerProfile};

use crate::{GenerateArgs, HistoryCommand, ServerCommand, SyncCommand};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

// -- server --

pub(crate) async fn server(store: &Arc<ConfigStore>, action: ServerCommand) -> CommandResult {
    match action {
        ServerCommand::List => {
            let servers = store.list_servers().await?;
            if servers.is_empty() {
                println!("no server profiles yet; add one with `wgvault server add`");
                return Ok(());
            }
            for profile in servers {
                println!(
                    "{}  {}  {}  next peer id {}",
                    profile.id, profile.name, profile.endpoint, profile.next_peer_id
                );
            }
            Ok(())
        }
        ServerCommand::Show { id } => {
            let profile = store.get_server(&id).await?;
            print_profile(&profile);
            Ok(())
        }
        ServerCommand::Add(fields) => {
            let mut profile = ServerProfile::new(fields.name, Utc::now());
            profile.peer_public_key = fields.public_key;
            profile.endpoint = fields.endpoint;
            profile.allowed_ips = fields.allowed_ips;
            profile.preshared_key = if fields.gen_psk {
                Some(keys::generate_preshared_key())
            } else {
                fields.preshared_key.filter(|k| !k.is_empty())
            };
            profile.persistent_keepalive = Some(fields.keepalive);
            profile.router_interface = fields.router_interface;

            store.put_server(&profile).await?;
            println!("created server profile {}", profile.id);
            Ok(())
        }
        ServerCommand::Edit { id, fields } => {
            let mut profile = store.get_server(&id).await?;
            if let Some(name) = fields.name {
                profile.name = name;
            }
            if let Some(public_key) = fields.public_key {
                profile.peer_public_key = public_key;
            }
            if let Some(endpoint) = fields.endpoint {
                profile.endpoint = endpoint;
            }
            if let Some(allowed_ips) = fields.allowed_ips {
                profile.allowed_ips = allowed_ips;
            }
            if let Some(psk) = fields.preshared_key {
                // An explicit empty value clears the key.
                profile.preshared_key = if psk.is_empty() { None } else { Some(psk) };
            }
            if let Some(keepalive) = fields.keepalive {
                profile.persistent_keepalive = Some(keepalive);
            }
            if let Some(router_interface) = fields.router_interface {
                profile.router_interface = router_interface;
            }
            store.put_server(&profile).await?;
            println!("updated server profile {id}");
            Ok(())
        }
        ServerCommand::Rm { id } => {
            store.delete_server(&id).await?;
            println!("deleted server profile {id} (history entries are kept)");
            Ok(())
        }
    }
}

fn print_profile(profile: &ServerProfile) {
    println!("id:                  {}", profile.id);
    println!("name:                {}", profile.name);
    println!("public key:          {}", profile.peer_public_key);
    println!("endpoint:            {}", profile.endpoint);
    println!("allowed ips:         {}", profile.allowed_ips);
    if let Some(ref psk) = profile.preshared_key {
        println!("preshared key:       {psk}");
    }
    if let Some(keepalive) = profile.persistent_keepalive {
        println!("keepalive:           {keepalive}s");
    }
    println!("router interface:    {}", profile.router_interface);
    println!("next peer id:        {}", profile.next_peer_id);
    println!("created:             {}", profile.created_at.to_rfc3339());
}

// -- generate --

pub(crate) async fn generate(store: &Arc<ConfigStore>, args: GenerateArgs) -> CommandResult {
    let profile = find_server(store, &args.server).await?;
    let peer_id = args.peer_id.unwrap_or_else(|| alloc::next_peer_id(&profile));

    let keypair = match args.private_key {
        Some(private_key) => keys::Keypair {
            public_key: keys::derive_public_key(&private_key)?,
            private_key,
        },
        None => keys::generate_keypair(),
    };

    let settings = store.settings().await?;
    let interface = args
        .interface
        .unwrap_or(settings.defaults.interface_name);
    let dns = args.dns.or(settings.defaults.dns);
    let listen_port = args.listen_port.or(settings.defaults.listen_port);

    let input = RenderInput {
        interface_name: &interface,
        private_key: &keypair.private_key,
        public_key: &keypair.public_key,
        address: &args.address,
        listen_port,
        dns: dns.as_deref(),
        server: &profile,
        peer_id,
        comment: &args.comment,
    };

    let wg_config = render(&input, Dialect::WgQuick);
    let ikuai_config = render(&input, Dialect::Ikuai);
    let (surge_config, mikrotik_config, openwrt_config) = if args.extra_dialects {
        (
            Some(render(&input, Dialect::Surge)),
            Some(render(&input, Dialect::Mikrotik)),
            Some(render(&input, Dialect::OpenWrt)),
        )
    } else {
        (None, None, None)
    };

    let now = Utc::now();
    let entry = HistoryEntry {
        id: HistoryEntry::id_for(now),
        timestamp: now,
        interface_name: interface.clone(),
        comment: args.comment.clone(),
        peer_id,
        address: args.address.clone(),
        public_key: keypair.public_key.clone(),
        wg_config: wg_config.clone(),
        ikuai_config: ikuai_config.clone(),
        surge_config,
        mikrotik_config,
        openwrt_config,
        server_id: Some(profile.id.clone()),
        server_name: Some(profile.name.clone()),
    };
    HistoryLedger::new(store).append(&entry).await?;

    // The generation is durable; only now does the counter move. It advances
    // from the stored value: an overridden peer id is a one-shot unless the
    // caller asked to save it back.
    let mut stored = store.get_server(&profile.id).await?;
    if args.save_peer_id {
        if let Some(edited) = args.peer_id {
            stored.next_peer_id = stored.next_peer_id.max(edited);
        }
    }
    let advanced = alloc::advance(stored);
    store.put_server(&advanced).await?;
    info!(
        server = %profile.name,
        peer_id,
        next_peer_id = advanced.next_peer_id,
        "generation recorded"
    );

    println!("# client config ({interface}.conf)");
    println!("{wg_config}");
    println!("# router peer line");
    println!("{ikuai_config}");
    println!("client public key: {}", keypair.public_key);
    println!("history entry:     {}", entry.id);

    if let Some(out) = args.out {
        tokio::fs::write(&out, &wg_config).await?;
        println!("saved client config to {}", out.display());
    }
    if args.qr {
        println!("{}", qr::encode_data_url(&wg_config)?);
    }
    Ok(())
}

/// Resolve a profile by id first, then by unique name.
async fn find_server(
    store: &Arc<ConfigStore>,
    key: &str,
) -> Result<ServerProfile, Box<dyn std::error::Error>> {
    if let Ok(profile) = store.get_server(key).await {
        return Ok(profile);
    }
    let mut matches: Vec<ServerProfile> = store
        .list_servers()
        .await?
        .into_iter()
        .filter(|p| p.name == key)
        .collect();
    if matches.len() > 1 {
        return Err(format!(
            "{} profiles are named \"{key}\"; use the id",
            matches.len()
        )
        .into());
    }
    matches
        .pop()
        .ok_or_else(|| format!("no server profile with id or name \"{key}\"").into())
}

// -- history --

pub(crate) async fn history(store: &Arc<ConfigStore>, action: HistoryCommand) -> CommandResult {
    let ledger = HistoryLedger::new(store);
    match action {
        HistoryCommand::List { server } => {
            let entries = match server {
                Some(ref id) => ledger.list_by_server(id).await?,
                None => ledger.list().await?,
            };
            if entries.is_empty() {
                println!("no history entries");
                return Ok(());
            }
            for entry in entries {
                println!(
                    "{}  {}  peer {}  {}  {}  {}",
                    entry.id,
                    entry.comment,
                    entry.peer_id,
                    entry.server_name.as_deref().unwrap_or("unknown server"),
                    entry.address,
                    entry.timestamp.to_rfc3339(),
                );
            }
            Ok(())
        }
        HistoryCommand::Show { id, qr: show_qr } => {
            let entry = ledger.get(&id).await?;
            println!("comment:       {}", entry.comment);
            println!("peer id:       {}", entry.peer_id);
            println!(
                "server:        {}",
                entry.server_name.as_deref().unwrap_or("unknown server")
            );
            println!("interface:     {}", entry.interface_name);
            println!("address:       {}", entry.address);
            println!("public key:    {}", entry.public_key);
            println!("generated:     {}", entry.timestamp.to_rfc3339());
            println!();
            println!("# client config");
            println!("{}", entry.wg_config);
            println!("# router peer line");
            println!("{}", entry.ikuai_config);
            for (label, config) in [
                ("surge", &entry.surge_config),
                ("mikrotik", &entry.mikrotik_config),
                ("openwrt", &entry.openwrt_config),
            ] {
                if let Some(config) = config {
                    println!("# {label}");
                    println!("{config}");
                }
            }
            if show_qr {
                println!("{}", qr::encode_data_url(&entry.wg_config)?);
            }
            Ok(())
        }
        HistoryCommand::Delete { id } => {
            ledger.delete(&id).await?;
            println!("deleted history entry {id}");
            Ok(())
        }
        HistoryCommand::Clear => {
            let removed = ledger.clear().await?;
            println!("cleared {removed} history entries");
            Ok(())
        }
        HistoryCommand::ExportPeers { out } => {
            let ids: Vec<String> = ledger.list().await?.into_iter().map(|e| e.id).collect();
            let blob = ledger.export_concatenated(&ids).await?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, &blob).await?;
                    println!("exported {} peer lines to {}", ids.len(), path.display());
                }
                None => print!("{blob}"),
            }
            Ok(())
        }
        HistoryCommand::ExportZip { dest } => {
            let ids: Vec<String> = ledger.list().await?.into_iter().map(|e| e.id).collect();
            let written = ledger.export_archive(&ids, &dest).await?;
            println!("exported {written} configs to {}", dest.display());
            Ok(())
        }
    }
}

// -- migrate --

pub(crate) async fn migrate(store: &Arc<ConfigStore>) -> CommandResult {
    // The conversion itself already ran during startup; report where things
    // stand.
    let settings = store.settings().await?;
    if settings.legacy_migrated {
        println!("legacy config has been migrated; nothing to do");
    } else if tokio::fs::try_exists(store.legacy_path()).await? {
        println!("a legacy config exists but was not migrated (see the log)");
    } else {
        println!("no legacy config present");
    }
    Ok(())
}

// -- settings --

pub(crate) async fn settings(store: &Arc<ConfigStore>) -> CommandResult {
    let app_settings = store.settings().await?;
    println!("data dir:        {}", store.root().display());
    println!(
        "defaults:        interface {}, listen port {}, dns {}",
        app_settings.defaults.interface_name,
        app_settings
            .defaults
            .listen_port
            .map_or_else(|| "unset".to_string(), |p| p.to_string()),
        app_settings.defaults.dns.as_deref().unwrap_or("unset"),
    );
    let webdav = &app_settings.webdav;
    println!(
        "webdav:          {}",
        if webdav.enabled { "enabled" } else { "disabled" }
    );
    if webdav.enabled {
        println!("  server url:    {}", webdav.server_url);
        println!("  username:      {}", webdav.username);
        println!(
            "  password:      {}",
            if webdav.password.is_empty() { "unset" } else { "(set)" }
        );
        println!("  auto sync:     {}", webdav.auto_sync_enabled);
        println!("  interval:      {}s", webdav.sync_interval().as_secs());
        println!("  timeout:       {}s", webdav.request_timeout().as_secs());
    }
    println!("legacy migrated: {}", app_settings.legacy_migrated);
    println!();
    println!("edit {} to change these", store.root().join("settings.toml").display());
    Ok(())
}

// -- sync --

pub(crate) async fn sync(store: &Arc<ConfigStore>, action: SyncCommand) -> CommandResult {
    match action {
        SyncCommand::Test => {
            webdav_client(store).await?.test_connection().await?;
            println!("webdav connection ok");
        }
        direction => {
            let engine = SyncEngine::new(store.clone(), webdav_client(store).await?);
            let result = match direction {
                SyncCommand::Download => engine.download().await?,
                SyncCommand::Upload => engine.upload().await?,
                _ => engine.bidirectional().await?,
            };
            print_sync_result(&result);
        }
    }
    Ok(())
}

async fn webdav_client(
    store: &Arc<ConfigStore>,
) -> Result<WebDavClient, Box<dyn std::error::Error>> {
    let settings = store.settings().await?;
    if !settings.webdav.enabled {
        return Err("webdav sync is disabled; enable it in settings.toml first".into());
    }
    Ok(WebDavClient::new(&settings.webdav)?)
}

fn print_sync_result(result: &SyncResult) {
    println!(
        "servers: {} uploaded, {} downloaded",
        result.servers_uploaded, result.servers_downloaded
    );
    println!(
        "history: {} uploaded, {} downloaded",
        result.history_uploaded, result.history_downloaded
    );
    for failure in &result.failed {
        println!("failed: {} ({})", failure.name, failure.error);
    }
}

// -- watch --

pub(crate) async fn watch(store: &Arc<ConfigStore>) -> CommandResult {
    let settings = store.settings().await?;
    let engine = SyncEngine::new(store.clone(), webdav_client(store).await?);

    let period = settings.webdav.sync_interval();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = period.as_secs(), "starting periodic sync");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            _ = interval.tick() => {
                // The pass runs to completion inside this arm; ctrl-c only
                // interrupts between passes, never mid-blob.
                match engine.try_bidirectional().await {
                    Ok(Some(result)) => {
                        info!(
                            uploaded = result.total_uploaded(),
                            downloaded = result.total_downloaded(),
                            failed = result.failed.len(),
                            "sync tick complete"
                        );
                        if result.is_partial() {
                            for failure in &result.failed {
                                warn!(name = %failure.name, error = %failure.error, "blob failed");
                            }
                        }
                    }
                    Ok(None) => debug!("previous sync still in flight, tick skipped"),
                    Err(e) => error!(error = %e, "sync tick failed, will retry next tick"),
                }
            }
        }
    }
    Ok(())
}
