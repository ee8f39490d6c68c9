use anyhow::Result;
use bytes::Bytes;
use futures_util::StreamExt;
use renter::{
    error::Error,
    renter::UploadRequest,
    settings::SettingsError,
    test_utils::{TestRenter, test_allowance, test_renter},
};
use tempfile::NamedTempFile;

const SIZE: usize = 200;

/// Uploads 200 bytes as 2 data + 1 parity pieces: two chunks of 128 and 72
/// bytes over three hosts.
async fn uploaded() -> Result<(TestRenter, NamedTempFile, Vec<u8>)> {
    let t = test_renter(3);
    t.renter.set_allowance(test_allowance()).await?;
    t.renter.process_block(1).await?;
    let data: Vec<u8> = (0..SIZE).map(|i| (i % 256) as u8).rev().collect();
    let source = NamedTempFile::new()?;
    std::fs::write(source.path(), &data)?;
    t.renter
        .upload(UploadRequest {
            path: "video/a.mp4".to_string(),
            source: source.path().to_path_buf(),
            data_pieces: 2,
            parity_pieces: 1,
        })
        .await?;
    Ok((t, source, data))
}

#[tokio::test]
async fn test_download_whole_file_and_ranges() -> Result<()> {
    let (t, _source, data) = uploaded().await?;
    assert_eq!(t.renter.download("video/a.mp4").await?, data);
    // two chunks, two pieces each
    assert_eq!(t.network.downloads(), 4);

    let range = t.renter.download_range("video/a.mp4", 100, 50).await?;
    assert_eq!(range, data[100..150]);
    let tail = t.renter.download_range("video/a.mp4", 199, 1).await?;
    assert_eq!(tail, data[199..]);
    assert!(t.renter.download_range("video/a.mp4", 200, 0).await?.is_empty());
    // both chunks were cached by the first download
    assert_eq!(t.network.downloads(), 4);
    assert_eq!(t.renter.history().len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_download_rejects_bad_ranges() -> Result<()> {
    let (t, _source, _) = uploaded().await?;
    assert!(matches!(
        t.renter.download_range("video/a.mp4", 150, 51).await,
        Err(Error::InvalidRange {
            offset: 150,
            length: 51,
            size: 200
        })
    ));
    assert!(matches!(
        t.renter.download_range("video/a.mp4", u64::MAX, 2).await,
        Err(Error::InvalidRange { .. })
    ));
    assert!(matches!(
        t.renter.download("missing").await,
        Err(Error::FileNotFound(_))
    ));
    assert_eq!(t.network.downloads(), 0);
    Ok(())
}

#[tokio::test]
async fn test_stream_yields_chunks_in_order() -> Result<()> {
    let (t, _source, data) = uploaded().await?;
    let chunks: Vec<Bytes> = t
        .renter
        .stream("video/a.mp4")?
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].len(), 128);
    assert_eq!(chunks[1].len(), 72);
    assert_eq!(chunks.concat(), data);
    assert_eq!(t.renter.cache().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_stream_cache_size() -> Result<()> {
    let (t, _source, data) = uploaded().await?;
    assert!(matches!(
        t.renter.set_stream_cache_size(0).await,
        Err(Error::Settings(SettingsError::ZeroStreamCacheSize))
    ));
    assert_eq!(t.renter.cache().capacity(), 2);

    t.renter.set_stream_cache_size(1).await?;
    assert_eq!(t.renter.settings().stream_cache_size, 1);
    assert_eq!(t.renter.cache().capacity(), 1);

    t.renter.download("video/a.mp4").await?;
    assert_eq!(t.renter.cache().len(), 1);
    // chunk 0 was evicted by chunk 1
    t.renter.download_range("video/a.mp4", 0, 10).await?;
    assert_eq!(t.network.downloads(), 6);
    t.renter.download_range("video/a.mp4", 0, 10).await?;
    assert_eq!(t.network.downloads(), 6);
    assert_eq!(
        t.renter.download_range("video/a.mp4", 0, 10).await?,
        data[..10]
    );
    Ok(())
}

#[tokio::test]
async fn test_download_survives_one_host_loss() -> Result<()> {
    let (t, _source, data) = uploaded().await?;
    t.network.set_online(&t.hosts[0], false);
    assert_eq!(t.renter.download("video/a.mp4").await?, data);

    t.renter.delete_file("video/a.mp4").await?;
    assert!(t.renter.cache().is_empty());
    assert!(matches!(
        t.renter.file_info("video/a.mp4").await,
        Err(Error::FileNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_download_unrecoverable_below_data_pieces() -> Result<()> {
    let (t, _source, _) = uploaded().await?;
    t.network.set_online(&t.hosts[0], false);
    t.network.set_online(&t.hosts[1], false);
    let err = t.renter.download("video/a.mp4").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Unrecoverable {
            chunk: 0,
            available: 1,
            required: 2,
            ..
        }
    ));
    let history = t.renter.history().list();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].length, SIZE as u64);
    Ok(())
}

#[tokio::test]
async fn test_rate_limits_are_applied() -> Result<()> {
    let (t, _source, _) = uploaded().await?;
    t.renter.set_rate_limits(1 << 20, 1 << 10).await?;
    assert_eq!(t.renter.limits().download.limit(), 1 << 20);
    assert_eq!(t.renter.limits().upload.limit(), 1 << 10);
    assert_eq!(t.renter.settings().max_upload_speed, 1 << 10);
    Ok(())
}
