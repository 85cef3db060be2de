//! 刷新令牌轮换的并发语义测试

use std::sync::Arc;
use taskhub::repository::{MemoryRefreshTokenStore, RefreshStoreError, RefreshTokenStore};
use uuid::Uuid;

#[tokio::test]
async fn test_concurrent_rotation_has_single_winner() {
    let store = Arc::new(MemoryRefreshTokenStore::new(3600));
    let user_id = Uuid::new_v4();
    let issued = store.create(user_id).await.unwrap();

    let a = {
        let store = store.clone();
        let code = issued.code.clone();
        let record_id = issued.record_id;
        tokio::spawn(async move { store.rotate(record_id, &code).await })
    };
    let b = {
        let store = store.clone();
        let code = issued.code.clone();
        let record_id = issued.record_id;
        tokio::spawn(async move { store.rotate(record_id, &code).await })
    };

    let (a, b) = tokio::join!(a, b);
    let results = [a.unwrap(), b.unwrap()];

    // 同一个 code 的两次并发轮换：恰好一个成功，落败方收到 Conflict
    let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(winners.len(), 1);

    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(loser, Err(RefreshStoreError::Conflict)));

    // 记录本身仍然有效，胜者拿到的新 code 可以继续轮换
    let winner_code = results
        .iter()
        .find_map(|r| r.as_ref().ok())
        .map(|r| r.code.clone())
        .unwrap();
    assert!(store.rotate(issued.record_id, &winner_code).await.is_ok());
}

#[tokio::test]
async fn test_loser_is_not_retried_with_new_code() {
    let store = MemoryRefreshTokenStore::new(3600);
    let issued = store.create(Uuid::new_v4()).await.unwrap();

    let rotated = store.rotate(issued.record_id, &issued.code).await.unwrap();

    // 旧 code 反复出示仍然是 Conflict，不存在宽限窗口
    for _ in 0..3 {
        let result = store.rotate(issued.record_id, &issued.code).await;
        assert!(matches!(result, Err(RefreshStoreError::Conflict)));
    }

    // Conflict 不破坏记录本身
    assert!(store.rotate(issued.record_id, &rotated.code).await.is_ok());
}
