//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

#[macro_use]
extern crate log;
extern crate clap;
extern crate ctrlc;

use clap::{App, Arg};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread, time,
};

use rpc::{
    connect::create_server::create_server, handler::RendezvousHandler,
    registry::ConnectionRegistry, store::MatchStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let matches = App::new("PSI DH Rendezvous")
        .version("0.1")
        .about("Rendezvous server for two party DH private set intersection")
        .args(&[
            Arg::with_name("host")
                .long("host")
                .takes_value(true)
                .required_unless("add-user")
                .help("Host path to listen on, ex: 0.0.0.0:10009"),
            Arg::with_name("db")
                .long("db")
                .takes_value(true)
                .default_value("sqlite://rendezvous.db")
                .help("SQLite url of the match request store"),
            Arg::with_name("add-user")
                .long("add-user")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Provision an account as name:password and exit"),
        ])
        .get_matches();

    let db = matches.value_of("db").unwrap_or("sqlite://rendezvous.db");
    let store = MatchStore::connect(db).await?;

    if let Some(users) = matches.values_of("add-user") {
        for user in users {
            let (name, password) = user
                .split_once(':')
                .ok_or("--add-user expects name:password")?;
            store.add_user(name, password).await?;
        }
        return Ok(());
    }

    let host = matches.value_of("host").ok_or("--host is required")?;
    let (listener, tx, mut rx) = create_server(host).await?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let recv_thread = thread::spawn(move || {
        let sleep_dur = time::Duration::from_millis(1000);
        while running.load(Ordering::Relaxed) {
            thread::sleep(sleep_dur);
        }

        info!("Shutting down server ...");
        let _ = tx.send(());
    });

    info!("Server starting at {}", host);
    let handler = RendezvousHandler::new(store, ConnectionRegistry::new());

    loop {
        tokio::select! {
            _ = &mut rx => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!("connection from {}", peer);
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!("set_nodelay on {} failed: {}", peer, e);
                    }
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler.handle_connection(socket).await {
                            warn!("connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => error!("accept failed: {}", e),
            },
        }
    }

    if recv_thread.join().is_err() {
        error!("shutdown thread panicked");
    }
    info!("Bye!");
    Ok(())
}
