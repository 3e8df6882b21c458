//! Per-piece block fetch and verification.
use super::{DownloadError, DownloadResult, PieceJob};
use crate::peer::message::{Message, MessageId, BLOCK_SIZE};
use crate::peer::PeerSession;
use sha1::{Digest, Sha1};

/// Downloads one piece from an unchoked session, block by block.
///
/// Blocks are requested sequentially: REQUEST for 16 KiB (the final block
/// holds the remainder), then the matching PIECE message. The peer must
/// echo the requested index and offset and return exactly the requested
/// number of bytes. The assembled piece is only returned once its SHA-1
/// equals the metainfo hash for that index.
#[tracing::instrument(level = "debug", skip(session, job), fields(piece = job.index, peer = %session.addr()))]
pub async fn fetch_piece(session: &mut PeerSession, job: &PieceJob) -> DownloadResult<Vec<u8>> {
    let block_count = job.length.div_ceil(BLOCK_SIZE);
    let mut piece = Vec::with_capacity(job.length as usize);

    for block in 0..block_count {
        let begin = block * BLOCK_SIZE;
        let block_len = BLOCK_SIZE.min(job.length - begin);
        session
            .send(&Message::request(job.index as u32, begin, block_len))
            .await?;

        let message = session.wait_for(MessageId::Piece).await?;
        let data = message.parse_piece()?;
        if data.index as usize != job.index
            || data.begin != begin
            || data.block.len() != block_len as usize
        {
            return Err(DownloadError::BlockMismatch { index: job.index });
        }
        piece.extend_from_slice(data.block);
    }

    let digest = <[u8; 20]>::from(Sha1::digest(&piece));
    if digest != job.hash {
        tracing::warn!(
            got = %hex::encode(digest),
            want = %hex::encode(job.hash),
            "piece failed verification"
        );
        return Err(DownloadError::HashMismatch { index: job.index });
    }
    Ok(piece)
}
