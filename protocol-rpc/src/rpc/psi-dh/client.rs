//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::App;
use clap::Arg;
use clap::ArgGroup;
use common::blob::BlobExchange;
use common::blob::ContentId;
use common::blob::IpfsBlobStore;
use common::blob::LocalBlobStore;
use common::metrics::Metrics;
use common::timer;
use protocol::fileio::parse_column_list;
use protocol::fileio::RecordSource;
use protocol::session::orchestrator::SessionConfig;
use protocol::session::orchestrator::SessionOrchestrator;
use protocol::session::traits::LocalCache;
use protocol::session::traits::ProtocolStateStore;
use protocol::session::MatchRequest;
use protocol::session::PartyRole;
use protocol::session::SessionError;
use protocol::session::SessionState;
use rpc::cache::SqlLocalCache;
use rpc::connect::create_client::create_client;
use rpc::control::ControlClient;
use rpc::proto::Signal;
use rpc::remote::RemoteStateStore;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;

const MENU: &str = "commands: peers | create <partner> | list | confirm <request-id> | run <request-id> [round] | logout";

/// Everything a party needs to build orchestrators for its requests
struct Party {
    config: SessionConfig,
    store: Arc<dyn ProtocolStateStore>,
    cache: Arc<dyn LocalCache>,
    exchange: Arc<dyn BlobExchange>,
    source: Arc<RecordSource>,
    auto_advance: bool,
}

impl Party {
    fn orchestrator(&self, request_id: &str) -> SessionOrchestrator {
        SessionOrchestrator::new(
            self.config.clone(),
            request_id,
            self.store.clone(),
            self.cache.clone(),
            self.exchange.clone(),
            self.source.clone(),
        )
    }

    async fn run(&self, request_id: &str, round: Option<u8>) {
        let mut orchestrator = self.orchestrator(request_id);
        let mut result = orchestrator.run_round(round).await;
        if self.auto_advance && result.is_ok() {
            result = orchestrator.run_until_blocked().await;
        }
        self.show(&orchestrator, result.map(|_| ()));
    }

    async fn on_partner_content(&self, request_id: &str, round: u8, cid: &ContentId) {
        let mut orchestrator = self.orchestrator(request_id);
        let mut result = orchestrator.resume().await.map(|_| ());
        if result.is_ok() {
            result = orchestrator.on_partner_signal(round, cid).await.map(|_| ());
        }
        if self.auto_advance && result.is_ok() {
            result = orchestrator.run_until_blocked().await.map(|_| ());
        }
        self.show(&orchestrator, result);
    }

    fn show(
        &self,
        orchestrator: &SessionOrchestrator,
        result: Result<(), SessionError>,
    ) {
        let request_id = orchestrator.request_id();
        match result {
            Ok(()) => println!("{}: {}", request_id, orchestrator.state()),
            Err(e) => println!("{}: {} ({})", request_id, e, e.kind()),
        }
        if orchestrator.state() != &SessionState::Completed {
            return;
        }
        match orchestrator.report() {
            Some(report) => {
                let metrics = Metrics::new("psi-dh");
                metrics.set_request_id(request_id);
                metrics.set_own_input_size(report.own_input_size);
                metrics.set_partner_extract_size(report.partner_extract_size);
                metrics.set_intersection_size(report.intersection_size);
                metrics.print_metrics();
                let metrics_path = report.output_path.with_extension("metrics.json");
                if let Err(e) = metrics.save_metrics(&metrics_path.to_string_lossy()) {
                    warn!("cannot save metrics to {}: {}", metrics_path.display(), e);
                }
                println!("{}: output written to {}", request_id, report.output_path.display());
            }
            None => println!(
                "{}: already completed, output at {}",
                request_id,
                orchestrator.output_path().display()
            ),
        }
    }
}

fn print_request(username: &str, request: &MatchRequest) {
    let role = match request.role_of(username) {
        Some(role) => role,
        None => return,
    };
    let confirmed = |r: PartyRole| match r {
        PartyRole::A => request.confirmed_a,
        PartyRole::B => request.confirmed_b,
    };
    println!(
        "{} partner={} confirmed own={} partner={} rounds own={} partner={}",
        request.request_id,
        request.party(role.other()),
        confirmed(role),
        confirmed(role.other()),
        request.progress(role),
        request.progress(role.other()),
    );
}

/// Handles one menu line, `false` once the party logged out
async fn handle_line(
    line: &str,
    username: &str,
    client: &ControlClient,
    party: &Party,
) -> bool {
    let words = line.split_whitespace().collect::<Vec<_>>();
    let outcome = match words.as_slice() {
        [] => Ok(()),
        ["peers"] => client.list_peers().await.map(|peers| {
            if peers.is_empty() {
                println!("no other party online");
            }
            for peer in peers {
                println!("{}", peer);
            }
        }),
        ["create", partner] => client.create_match(partner).await.map(|request| {
            println!("created request {} with {}", request.request_id, partner);
        }),
        ["list"] => client.list_matches().await.map(|requests| {
            if requests.is_empty() {
                println!("no match requests");
            }
            for request in requests.iter() {
                print_request(username, request);
            }
        }),
        ["confirm", request_id] => client
            .confirm(request_id)
            .await
            .map(|request| print_request(username, &request)),
        ["run", request_id] => {
            party.run(request_id, None).await;
            Ok(())
        }
        ["run", request_id, round] => {
            match round.parse::<u8>() {
                Ok(round) => party.run(request_id, Some(round)).await,
                Err(_) => println!("round must be a number between 1 and 4"),
            }
            Ok(())
        }
        ["logout"] | ["quit"] | ["exit"] => {
            if let Err(e) = client.logout().await {
                warn!("logout failed: {}", e);
            }
            return false;
        }
        _ => {
            println!("{}", MENU);
            Ok(())
        }
    };
    if let Err(e) = outcome {
        println!("error: {}", e);
    }
    true
}

async fn handle_signal(signal: Signal, party: &Party) {
    match signal {
        Signal::MatchCreated { request_id, from } => {
            println!("{} created match request {}", from, request_id);
        }
        Signal::PartnerConfirmed {
            request_id,
            partner,
        } => {
            println!("{} confirmed request {}", partner, request_id);
            if party.auto_advance {
                party.run(&request_id, None).await;
            }
        }
        Signal::PartnerContent {
            request_id,
            round,
            cid,
        } => {
            println!("partner published round {} of {}", round, request_id);
            party.on_partner_content(&request_id, round, &cid).await;
        }
        Signal::PendingWork { request_ids } => {
            println!("pending work on: {}", request_ids.join(", "));
            if party.auto_advance {
                for request_id in request_ids.iter() {
                    party.run(request_id, None).await;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let matches = App::new("PSI DH Client")
        .version("0.1")
        .about("Party client for two party DH private set intersection")
        .args(&[
            Arg::with_name("server")
                .long("server")
                .short("s")
                .takes_value(true)
                .required(true)
                .help("Rendezvous server to connect to, ex: 0.0.0.0:10009"),
            Arg::with_name("username")
                .long("username")
                .takes_value(true)
                .required(true)
                .help("Account name of this party"),
            Arg::with_name("password")
                .long("password")
                .takes_value(true)
                .env("PSI_PASSWORD")
                .required(true)
                .help("Account password"),
            Arg::with_name("input")
                .long("input")
                .short("i")
                .default_value("input.csv")
                .help("Path to input CSV file, first row is the header"),
            Arg::with_name("id-columns")
                .long("id-columns")
                .takes_value(true)
                .required(true)
                .help("Comma separated identifier columns, ex: email,phone"),
            Arg::with_name("publish-columns")
                .long("publish-columns")
                .takes_value(true)
                .default_value("")
                .help("Comma separated columns revealed to the partner for matched rows"),
            Arg::with_name("cache-db")
                .long("cache-db")
                .takes_value(true)
                .default_value("sqlite://psi-cache.db")
                .help("SQLite url of the local round cache"),
            Arg::with_name("blob-dir")
                .long("blob-dir")
                .takes_value(true)
                .help("Content addressed directory shared by both parties"),
            Arg::with_name("ipfs-api")
                .long("ipfs-api")
                .takes_value(true)
                .help("IPFS HTTP API base url, ex: http://127.0.0.1:5001"),
            Arg::with_name("ipfs-timeout")
                .long("ipfs-timeout")
                .takes_value(true)
                .default_value("30")
                .help("IPFS request timeout in seconds"),
            Arg::with_name("work-dir")
                .long("work-dir")
                .takes_value(true)
                .default_value("psi-work")
                .help("Directory for round artifacts"),
            Arg::with_name("output-dir")
                .long("output-dir")
                .short("o")
                .takes_value(true)
                .default_value("psi-output")
                .help("Directory for the final <request-id>.csv files"),
            Arg::with_name("auto-advance")
                .long("auto-advance")
                .takes_value(false)
                .help("Run the next round as soon as the partner publishes"),
        ])
        .groups(&[ArgGroup::with_name("blobs")
            .args(&["blob-dir", "ipfs-api"])
            .required(true)])
        .get_matches();

    let global_timer = timer::Timer::new_silent("global");
    let server = matches.value_of("server").ok_or("--server is required")?;
    let username = matches.value_of("username").ok_or("--username is required")?;
    let password = matches.value_of("password").ok_or("--password is required")?;
    let input_path = matches.value_of("input").unwrap_or("input.csv");
    let id_columns = parse_column_list(matches.value_of("id-columns").unwrap_or_default());
    let publish_columns =
        parse_column_list(matches.value_of("publish-columns").unwrap_or_default());
    let cache_db = matches
        .value_of("cache-db")
        .unwrap_or("sqlite://psi-cache.db");

    let exchange: Arc<dyn BlobExchange> = match (
        matches.value_of("blob-dir"),
        matches.value_of("ipfs-api"),
    ) {
        (Some(dir), _) => {
            info!("Using blob directory {}", dir);
            Arc::new(LocalBlobStore::new(dir)?)
        }
        (None, Some(api)) => {
            let timeout = matches
                .value_of("ipfs-timeout")
                .unwrap_or("30")
                .parse::<u64>()?;
            info!("Using IPFS api at {}", api);
            Arc::new(IpfsBlobStore::new(api, Duration::from_secs(timeout))?)
        }
        (None, None) => return Err("one of --blob-dir or --ipfs-api is required".into()),
    };

    let source = Arc::new(RecordSource::load(input_path, &id_columns, &publish_columns)?);
    info!("Input path: {}, {} records", input_path, source.len());

    let stream = create_client(server, 10, Duration::from_millis(3000)).await?;
    let (client, mut signals) = ControlClient::spawn(stream);
    client.login(username, password).await?;
    info!("Logged in as {}", username);

    let cache = Arc::new(SqlLocalCache::connect(cache_db, username).await?);
    let party = Party {
        config: SessionConfig::new(
            username,
            PathBuf::from(matches.value_of("work-dir").unwrap_or("psi-work")),
            PathBuf::from(matches.value_of("output-dir").unwrap_or("psi-output")),
        ),
        store: Arc::new(RemoteStateStore::new(client.clone())),
        cache,
        exchange,
        source,
        auto_advance: matches.is_present("auto-advance"),
    };

    let (ctrlc_tx, mut ctrlc_rx) = mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(());
    })?;

    println!("{}", MENU);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(line.trim(), username, &client, &party).await {
                        break;
                    }
                }
                None => {
                    let _ = client.logout().await;
                    break;
                }
            },
            signal = signals.recv() => match signal {
                Some(signal) => handle_signal(signal, &party).await,
                None => {
                    error!("connection to {} lost", server);
                    break;
                }
            },
            _ = ctrlc_rx.recv() => {
                info!("Caught Ctrl-C, logging out");
                let _ = client.logout().await;
                break;
            }
        }
    }

    global_timer.qps("session", party.source.len());
    info!("Bye!");
    Ok(())
}
