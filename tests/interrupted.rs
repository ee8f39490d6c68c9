use anyhow::Result;
use renter::{
    contracts::{ContractFilter, ContractView},
    renter::UploadRequest,
    test_utils::{TestRenter, random_bytes, test_allowance, test_renter},
    types::{Currency, HostKey},
};
use tempfile::NamedTempFile;

const RENTER_FUNDS: u128 = 111_096;

fn upload_request(path: &str, source: &NamedTempFile, data: usize, parity: usize) -> UploadRequest {
    UploadRequest {
        path: path.to_string(),
        source: source.path().to_path_buf(),
        data_pieces: data,
        parity_pieces: parity,
    }
}

async fn contract_of(t: &TestRenter, host_key: &HostKey) -> ContractView {
    t.renter
        .contracts_by_filter(ContractFilter::Active)
        .await
        .into_iter()
        .find(|v| &v.contract.host_key == host_key)
        .expect("active contract")
}

#[tokio::test]
async fn test_failed_upload_is_not_charged() -> Result<()> {
    let t = test_renter(3);
    t.renter.set_allowance(test_allowance()).await?;
    t.renter.process_block(1).await?;

    let data = random_bytes(200);
    let source = NamedTempFile::new()?;
    std::fs::write(source.path(), &data)?;
    t.network.set_online(&t.hosts[0], false);
    let info = t
        .renter
        .upload(upload_request("a.bin", &source, 1, 2))
        .await?;
    assert_eq!(info.redundancy, 2.0);
    assert_eq!(t.network.uploads(), 8);

    let lost = contract_of(&t, &t.hosts[0]).await.contract;
    assert_eq!(lost.upload_spending, Currency::ZERO);
    assert_eq!(lost.renter_funds, Currency::new(RENTER_FUNDS));
    assert!(lost.good_for_upload);
    for host in &t.hosts[1..] {
        let contract = contract_of(&t, host).await.contract;
        assert_eq!(contract.upload_spending, Currency::new(4 * 64));
        assert_eq!(contract.renter_funds, Currency::new(RENTER_FUNDS - 4 * 64));
    }
    t.renter
        .financial_metrics()
        .await
        .reconcile(test_allowance().funds)?;

    // the host returns and the next cycle places the missing pieces on it
    t.network.set_online(&t.hosts[0], true);
    t.renter.process_block(2).await?;
    assert_eq!(t.renter.file_info("a.bin").await?.redundancy, 3.0);
    assert_eq!(t.network.piece_count(&t.hosts[0]), 4);
    let repaired = contract_of(&t, &t.hosts[0]).await.contract;
    assert_eq!(repaired.id, lost.id);
    assert_eq!(repaired.upload_spending, Currency::new(4 * 64));
    assert_eq!(t.renter.download("a.bin").await?, data);
    Ok(())
}

#[tokio::test]
async fn test_failed_download_is_not_charged() -> Result<()> {
    let t = test_renter(3);
    t.renter.set_allowance(test_allowance()).await?;
    t.renter.process_block(1).await?;

    let data = random_bytes(200);
    let source = NamedTempFile::new()?;
    std::fs::write(source.path(), &data)?;
    t.renter
        .upload(upload_request("a.bin", &source, 2, 1))
        .await?;

    // the first source of the first piece drops before it is read
    let file = t.renter.files().get("a.bin").expect("file");
    let first = file.chunks[0].pieces[0][0].host_key.clone();
    t.network.set_online(&first, false);
    assert_eq!(t.renter.download("a.bin").await?, data);
    assert_eq!(t.network.downloads(), 4);

    let skipped = contract_of(&t, &first).await.contract;
    assert_eq!(skipped.download_spending, Currency::ZERO);
    assert_eq!(skipped.renter_funds, Currency::new(RENTER_FUNDS - 2 * 64));
    let metrics = t.renter.financial_metrics().await;
    assert_eq!(metrics.download_spending, Currency::new(4 * 64));
    metrics.reconcile(test_allowance().funds)?;

    // contracts keep working for later transfers
    t.network.set_online(&first, true);
    let (other, other_data) = (NamedTempFile::new()?, random_bytes(100));
    std::fs::write(other.path(), &other_data)?;
    let info = t
        .renter
        .upload(upload_request("b.bin", &other, 2, 1))
        .await?;
    assert_eq!(info.redundancy, 1.5);
    assert_eq!(t.renter.download("b.bin").await?, other_data);
    Ok(())
}
