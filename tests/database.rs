use anyhow::Result;
use renter::{
    contracts::{Contract, ContractView, LifecycleState},
    files::{PieceLocation, TrackedFile},
    test_utils::new_test_db,
    types::{ContractId, Currency, HostKey, PieceRoot},
};

fn contract(host: &str, start: u64) -> Contract {
    let host_key = HostKey::new(host);
    Contract::builder()
        .id(ContractId::derive(&host_key, start, 0))
        .host_address(format!("{}:9982", host))
        .host_key(host_key)
        .start_height(start)
        .end_height(start + 50)
        .total_cost(Currency::new(1_000))
        .renter_funds(Currency::new(900))
        .fees(Currency::new(100))
        .build()
}

#[tokio::test]
async fn test_contracts_are_upserted() -> Result<()> {
    let (reader, writer, _temp_dir) = new_test_db().await?;
    assert!(reader.load_contracts().await?.is_empty());

    let a = ContractView {
        contract: contract("a", 0),
        state: LifecycleState::Active,
    };
    let b = ContractView {
        contract: contract("b", 0),
        state: LifecycleState::Active,
    };
    writer.save_contracts(&[a.clone(), b.clone()]).await?;
    assert_eq!(reader.load_contracts().await?, vec![a.clone(), b.clone()]);

    let retired = ContractView {
        contract: Contract {
            good_for_upload: false,
            good_for_renew: false,
            upload_spending: Currency::new(40),
            renter_funds: Currency::new(860),
            ..a.contract.clone()
        },
        state: LifecycleState::Inactive,
    };
    let renewed = ContractView {
        contract: contract("a", 30),
        state: LifecycleState::Active,
    };
    writer
        .save_contracts(&[retired.clone(), b.clone(), renewed.clone()])
        .await?;

    // updates keep their original row order
    assert_eq!(reader.load_contracts().await?, vec![retired, b, renewed]);
    Ok(())
}

#[tokio::test]
async fn test_files_are_saved_and_deleted() -> Result<()> {
    let (reader, writer, _temp_dir) = new_test_db().await?;

    let mut file = TrackedFile::new("docs/a.txt".to_string(), 2, 1, 300, 64, None);
    assert_eq!(file.chunks.len(), 3);
    writer.save_file(&file).await?;

    let host_key = HostKey::new("a");
    file.add_location(
        1,
        2,
        PieceLocation {
            contract_id: ContractId::derive(&host_key, 0, 0),
            host_key,
            root: PieceRoot::hash(b"piece"),
        },
    );
    writer.save_file(&file).await?;
    let other = TrackedFile::new("b".to_string(), 1, 0, 10, 64, None);
    writer.save_file(&other).await?;
    assert_eq!(reader.load_files().await?, vec![file, other.clone()]);

    writer.delete_file("docs/a.txt").await?;
    writer.delete_file("missing").await?;
    assert_eq!(reader.load_files().await?, vec![other]);
    Ok(())
}
