mod arg_parse;

use std::process::ExitCode;

use clap::Parser;

use swarmload::{swarm, torrent::Metainfo, tracker::TrackerClient};

fn main() -> ExitCode {
    env_logger::init();
    let cli = arg_parse::Cli::parse();

    let metainfo = match Metainfo::from_file(&cli.input) {
        Ok(metainfo) => metainfo,
        Err(err) => {
            log::error!("failed to read {}: {err}", cli.input.display());
            return ExitCode::FAILURE;
        }
    };
    log::info!(
        "{}: info_hash {}, {} pieces, {} bytes total",
        metainfo.name,
        hex::encode(metainfo.info_hash),
        metainfo.piece_hashes.len(),
        metainfo.total_length
    );

    let peer_id = swarm::random_peer_id();
    let tracker = TrackerClient::new();
    let peers = match tracker.announce(&metainfo.announce, &metainfo.info_hash, &peer_id, metainfo.total_length) {
        Ok(peers) => peers,
        Err(err) => {
            log::error!("tracker announce failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    if peers.is_empty() {
        log::error!("tracker returned no peers");
        return ExitCode::FAILURE;
    }
    log::info!("tracker returned {} peers", peers.len());

    let result = swarm::download(&metainfo, peer_id, peers);
    if !result.complete {
        log::error!("download did not complete: some pieces were never fetched from any peer");
        return ExitCode::FAILURE;
    }

    if let Err(err) = std::fs::write(&cli.output, &result.bytes) {
        log::error!("failed to write {}: {err}", cli.output.display());
        return ExitCode::FAILURE;
    }

    log::info!("wrote {} bytes to {}", result.bytes.len(), cli.output.display());
    ExitCode::SUCCESS
}
