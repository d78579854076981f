use async_trait::async_trait;
use bitcoin::{Address, OutPoint, Txid};
use echolock_core::EchoLockError;
use serde::Deserialize;

/// One unspent output at a watched address.
#[derive(Clone, Debug)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value_sats: u64,
}

/// The two calls the timelock commitment needs from the settlement
/// chain. Implementations may back this with any API that returns
/// equivalent structured data — `HttpChain` is the production one.
#[async_trait]
pub trait Chain: Send + Sync {
    async fn get_tip_height(&self) -> Result<u64, EchoLockError>;
    async fn get_address_utxos(&self, address: &Address) -> Result<Vec<Utxo>, EchoLockError>;
}

/// `Chain` backed by a configurable HTTP chain-indexer API
/// (`{base_url}/height` and `{base_url}/address/{addr}/utxos`).
pub struct HttpChain {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Deserialize)]
struct UtxoResponse {
    txid: String,
    vout: u32,
    value: u64,
}

impl HttpChain {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Chain for HttpChain {
    async fn get_tip_height(&self) -> Result<u64, EchoLockError> {
        let url = format!("{}/height", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EchoLockError::ChainUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| EchoLockError::ChainUnreachable(e.to_string()))?
            .json::<HeightResponse>()
            .await
            .map_err(|e| EchoLockError::ChainUnreachable(e.to_string()))?;
        Ok(resp.height)
    }

    async fn get_address_utxos(&self, address: &Address) -> Result<Vec<Utxo>, EchoLockError> {
        let url = format!("{}/address/{}/utxos", self.base_url, address);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EchoLockError::ChainUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| EchoLockError::ChainUnreachable(e.to_string()))?
            .json::<Vec<UtxoResponse>>()
            .await
            .map_err(|e| EchoLockError::ChainUnreachable(e.to_string()))?;

        resp.into_iter()
            .map(|u| {
                let txid: Txid = u
                    .txid
                    .parse()
                    .map_err(|e| EchoLockError::ChainUnreachable(format!("bad txid: {e}")))?;
                Ok(Utxo {
                    outpoint: OutPoint::new(txid, u.vout),
                    value_sats: u.value,
                })
            })
            .collect()
    }
}
