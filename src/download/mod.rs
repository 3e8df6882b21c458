//! Download scheduling and output assembly.
//!
//! The coordinator owns the piece-status map and the assembled output.
//! Connected sessions circulate through a bounded channel; worker tasks
//! lease a session, attempt one piece job, and report the outcome back
//! over a results channel. A session that completes (or merely lacks the
//! piece) re-enters the pool; a session that errors is dropped and its
//! job retried elsewhere.
use crate::peer::{PeerError, PeerSession};
use crate::torrent::{FileLayout, TorrentFile};
use crate::tracker::Peer;
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

pub mod piece;

pub use piece::fetch_piece;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("piece {index} failed hash verification")]
    HashMismatch { index: usize },

    #[error("peer returned the wrong block for piece {index}")]
    BlockMismatch { index: usize },

    #[error("peer does not have piece {index}")]
    MissingPiece { index: usize },

    #[error("piece index {0} is out of range")]
    UnknownPiece(usize),

    #[error("no peer could be contacted")]
    NoPeers,

    #[error("download stalled on piece {0}")]
    Stalled(usize),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// One schedulable unit of work: a piece index with its expected length
/// and hash. `attempts` counts every time the job came back unfinished;
/// the coordinator bounds it so a hopeless piece surfaces as `Stalled`
/// instead of looping forever.
#[derive(Debug, Clone)]
pub struct PieceJob {
    pub index: usize,
    pub length: u32,
    pub hash: [u8; 20],
    pub(crate) attempts: u32,
}

impl PieceJob {
    pub fn new(torrent: &TorrentFile, index: usize) -> Self {
        Self {
            index,
            length: torrent.piece_size(index) as u32,
            hash: torrent.piece_hashes[index],
            attempts: 0,
        }
    }
}

enum Outcome {
    Verified {
        index: usize,
        bytes: Vec<u8>,
        session: PeerSession,
    },
    Missing {
        job: PieceJob,
        session: PeerSession,
    },
    Failed {
        job: PieceJob,
        error: DownloadError,
    },
}

/// Downloads every piece of `torrent` from `peers` and returns the
/// assembled content in index order.
#[tracing::instrument(level = "info", skip_all, fields(pieces = torrent.piece_count(), peers = peers.len()))]
pub async fn download_all(
    torrent: &TorrentFile,
    peers: &[Peer],
    peer_id: [u8; 20],
) -> DownloadResult<Vec<u8>> {
    let sessions = connect_pool(peers, torrent.info_hash, peer_id).await;
    if sessions.is_empty() {
        return Err(DownloadError::NoPeers);
    }
    let mut live = sessions.len();
    let max_attempts = (4 * live as u32).max(8);

    let (pool_tx, mut pool_rx) = mpsc::channel(live);
    for session in sessions {
        pool_tx.send(session).await.expect("pool has capacity");
    }
    let (done_tx, mut done_rx) = mpsc::channel::<Outcome>(live);

    let piece_count = torrent.piece_count();
    let piece_length = torrent.info.piece_length as usize;
    let mut pending: VecDeque<PieceJob> =
        (0..piece_count).map(|i| PieceJob::new(torrent, i)).collect();
    let mut output = vec![0u8; torrent.total_length() as usize];
    let mut verified = 0usize;
    let mut in_flight = 0usize;

    while verified < piece_count {
        if live == 0 && in_flight == 0 {
            let index = pending.front().map_or(0, |job| job.index);
            return Err(DownloadError::Stalled(index));
        }

        tokio::select! {
            outcome = done_rx.recv() => {
                in_flight -= 1;
                match outcome.expect("coordinator holds a sender") {
                    Outcome::Verified { index, bytes, session } => {
                        let start = index * piece_length;
                        output[start..start + bytes.len()].copy_from_slice(&bytes);
                        verified += 1;
                        tracing::debug!(piece = index, verified, total = piece_count, "piece verified");
                        let _ = pool_tx.send(session).await;
                    }
                    Outcome::Missing { job, session } => {
                        let _ = pool_tx.send(session).await;
                        requeue(&mut pending, job, max_attempts)?;
                    }
                    Outcome::Failed { job, error } => {
                        live -= 1;
                        tracing::warn!(piece = job.index, %error, "piece attempt failed; session dropped");
                        requeue(&mut pending, job, max_attempts)?;
                    }
                }
            }
            session = pool_rx.recv(), if !pending.is_empty() => {
                let session = session.expect("coordinator holds a sender");
                let job = pending.pop_front().expect("guarded by is_empty");
                in_flight += 1;
                tokio::spawn(run_job(session, job, done_tx.clone()));
            }
        }
    }

    Ok(output)
}

/// Downloads a single piece, walking the peer list until one serves it.
pub async fn download_piece(
    torrent: &TorrentFile,
    peers: &[Peer],
    peer_id: [u8; 20],
    index: usize,
) -> DownloadResult<Vec<u8>> {
    if index >= torrent.piece_count() {
        return Err(DownloadError::UnknownPiece(index));
    }
    let job = PieceJob::new(torrent, index);
    for peer in peers {
        match fetch_from_peer(peer, torrent.info_hash, peer_id, &job).await {
            Ok(bytes) => return Ok(bytes),
            Err(error) => {
                tracing::warn!(%peer, piece = index, %error, "peer could not serve piece");
            }
        }
    }
    Err(DownloadError::Stalled(index))
}

/// Writes assembled content to disk.
///
/// Single-file torrents write `data` to `out` directly. Multi-file
/// torrents treat `data` as one logical stream and split it across the
/// file list in order, creating nested directories under `out`.
pub async fn write_output(
    torrent: &TorrentFile,
    data: &[u8],
    out: &Path,
) -> DownloadResult<()> {
    match &torrent.info.layout {
        FileLayout::Single { .. } => tokio::fs::write(out, data).await?,
        FileLayout::Multi { files } => {
            let mut offset = 0usize;
            for file in files {
                let length = file.length as usize;
                let mut path = out.to_path_buf();
                for component in &file.path {
                    path.push(component);
                }
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &data[offset..offset + length]).await?;
                offset += length;
            }
        }
    }
    Ok(())
}

/// Dials every endpoint concurrently; peers that fail to connect or
/// handshake are logged and discarded.
async fn connect_pool(
    peers: &[Peer],
    info_hash: [u8; 20],
    peer_id: [u8; 20],
) -> Vec<PeerSession> {
    let mut tasks = JoinSet::new();
    for peer in peers.iter().copied() {
        tasks.spawn(async move {
            let mut session = PeerSession::connect(peer.addr()).await?;
            session.handshake(info_hash, peer_id).await?;
            Ok::<_, PeerError>(session)
        });
    }

    let mut sessions = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(session)) => sessions.push(session),
            Ok(Err(error)) => tracing::warn!(%error, "discarding peer"),
            Err(error) => tracing::warn!(%error, "connect task panicked"),
        }
    }
    sessions
}

async fn run_job(mut session: PeerSession, job: PieceJob, done: mpsc::Sender<Outcome>) {
    let outcome = match attempt_piece(&mut session, &job).await {
        Ok(bytes) => Outcome::Verified {
            index: job.index,
            bytes,
            session,
        },
        Err(DownloadError::MissingPiece { .. }) => Outcome::Missing { job, session },
        Err(error) => Outcome::Failed { job, error },
    };
    let _ = done.send(outcome).await;
}

/// Runs one piece job over a fresh, single-use connection to `peer`.
async fn fetch_from_peer(
    peer: &Peer,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    job: &PieceJob,
) -> DownloadResult<Vec<u8>> {
    let mut session = PeerSession::connect(peer.addr()).await?;
    session.handshake(info_hash, peer_id).await?;
    attempt_piece(&mut session, job).await
}

async fn attempt_piece(
    session: &mut PeerSession,
    job: &PieceJob,
) -> DownloadResult<Vec<u8>> {
    session.ensure_unchoked().await?;
    if !session.has_piece(job.index) {
        return Err(DownloadError::MissingPiece { index: job.index });
    }
    fetch_piece(session, job).await
}

fn requeue(
    pending: &mut VecDeque<PieceJob>,
    mut job: PieceJob,
    max_attempts: u32,
) -> DownloadResult<()> {
    job.attempts += 1;
    if job.attempts >= max_attempts {
        return Err(DownloadError::Stalled(job.index));
    }
    pending.push_back(job);
    Ok(())
}
