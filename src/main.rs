use anyhow::Context;
use clap::{Parser, Subcommand};
use nanotorrent::bencode;
use nanotorrent::download;
use nanotorrent::peer::PeerSession;
use nanotorrent::torrent::TorrentFile;
use nanotorrent::tracker::{self, Client};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ntc", version, about = "A minimal BitTorrent client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a bencoded value and print it as JSON.
    Decode { value: String },

    /// Print the metainfo summary of a .torrent file.
    Info { torrent: PathBuf },

    /// Announce to the tracker and list the returned peers.
    Peers { torrent: PathBuf },

    /// Perform the wire handshake with one peer.
    Handshake {
        torrent: PathBuf,
        peer: SocketAddrV4,
    },

    /// Download a single piece and write it to a file.
    #[command(name = "download_piece")]
    DownloadPiece {
        #[arg(short = 'o', value_name = "OUT")]
        output: PathBuf,
        torrent: PathBuf,
        index: usize,
    },

    /// Download the whole torrent.
    Download {
        #[arg(short = 'o', value_name = "OUT")]
        output: PathBuf,
        torrent: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Diagnostics go to stderr; stdout belongs to the subcommand output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Decode { value } => {
            let decoded = bencode::decode(value.as_bytes())?;
            println!("{}", decoded.to_json());
        }
        Command::Info { torrent } => {
            let torrent = TorrentFile::load(&torrent)?;
            println!("Tracker URL: {}", torrent.announce);
            println!("Length: {}", torrent.total_length());
            println!("Info Hash: {}", hex::encode(torrent.info_hash));
            println!("Piece Length: {}", torrent.info.piece_length);
            println!("Piece Hashes:");
            for hash in &torrent.piece_hashes {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { torrent } => {
            let torrent = TorrentFile::load(&torrent)?;
            let client = Client::new(tracker::DEFAULT_PORT);
            let response = client.announce(&torrent).await?;
            for peer in response.peers {
                println!("{peer}");
            }
        }
        Command::Handshake { torrent, peer } => {
            let torrent = TorrentFile::load(&torrent)?;
            let client = Client::new(tracker::DEFAULT_PORT);
            let mut session = PeerSession::connect(peer).await?;
            let remote = session
                .handshake(torrent.info_hash, client.peer_id())
                .await?;
            println!("Peer ID: {}", hex::encode(remote));
        }
        Command::DownloadPiece {
            output,
            torrent,
            index,
        } => {
            let torrent = TorrentFile::load(&torrent)?;
            let client = Client::new(tracker::DEFAULT_PORT);
            let response = client.announce(&torrent).await?;
            let bytes =
                download::download_piece(&torrent, &response.peers, client.peer_id(), index)
                    .await?;
            tokio::fs::write(&output, &bytes)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Piece {} downloaded to {}.", index, output.display());
        }
        Command::Download { output, torrent } => {
            let source = torrent;
            let torrent = TorrentFile::load(&source)?;
            let client = Client::new(tracker::DEFAULT_PORT);
            let response = client.announce(&torrent).await?;
            let data =
                download::download_all(&torrent, &response.peers, client.peer_id()).await?;
            download::write_output(&torrent, &data, &output).await?;
            println!("Downloaded {} to {}.", source.display(), output.display());
        }
    }
    Ok(())
}
