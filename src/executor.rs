//! Polymarket CLOB order execution and on-chain redemption.
//!
//! Handles EIP-712 order signing, L1/L2 authentication against the CLOB API,
//! and redemption of winning outcome tokens through the CTF contract on
//! Polygon.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE as BASE64_URL, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// CTF Exchange contract address on Polygon - without 0x prefix
const CTF_EXCHANGE: &str = "4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

/// Conditional Tokens Framework contract on Polygon - without 0x prefix
const CTF_CONTRACT: &str = "4d97dcd97ec945f40cf65f87097ace5ea0476045";

/// USDC collateral token on Polygon - without 0x prefix
const USDC_ADDRESS: &str = "2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

/// Polygon chain ID
const POLYGON_CHAIN_ID: u64 = 137;

/// redeemPositions(collateral, parentCollectionId, conditionId, indexSets)
const REDEEM_SELECTOR: [u8; 4] = [0x3d, 0x7d, 0x3f, 0x5a];

/// Gas limit used when eth_estimateGas is unavailable
const REDEEM_GAS_FALLBACK: u128 = 300_000;

/// Order side enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

/// Signature type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// EOA wallet - signer owns the maker address
    Eoa = 0,
    /// Magic/Email wallet - signer is authorized for a different maker address
    Poly = 1,
}

/// CTF Exchange order, amounts in 6-decimal fixed point
#[derive(Debug, Clone)]
pub struct Order {
    pub salt: i64,
    pub maker: [u8; 20],
    pub signer: [u8; 20],
    pub taker: [u8; 20],
    pub token_id: [u8; 32],
    pub maker_amount: [u8; 32],
    pub taker_amount: [u8; 32],
    pub expiration: [u8; 32],
    pub nonce: [u8; 32],
    pub fee_rate_bps: [u8; 32],
    pub side: Side,
    pub signature_type: SignatureType,
    pub signature: Vec<u8>,
}

/// Signed order ready for JSON submission
#[derive(Debug, Clone, Serialize)]
pub struct SignedOrder {
    pub salt: i64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    #[serde(rename = "tokenId")]
    pub token_id: String,
    #[serde(rename = "makerAmount")]
    pub maker_amount: String,
    #[serde(rename = "takerAmount")]
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    #[serde(rename = "feeRateBps")]
    pub fee_rate_bps: String,
    pub side: String,
    #[serde(rename = "signatureType")]
    pub signature_type: u8,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
struct OrderRequest {
    order: SignedOrder,
    owner: String,
    #[serde(rename = "orderType")]
    order_type: &'static str,
}

/// API credentials
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

#[derive(Debug, Deserialize)]
struct ApiKeyResponse {
    #[serde(rename = "apiKey")]
    api_key: String,
    secret: String,
    passphrase: String,
}

/// Order response
#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    pub success: bool,
    #[serde(rename = "orderID")]
    pub order_id: Option<String>,
    #[serde(rename = "errorMsg")]
    pub error_msg: Option<String>,
}

/// Result of a submitted redemption transaction
#[derive(Debug, Clone)]
pub struct RedeemReceipt {
    pub tx_hash: String,
}

/// Polymarket order executor
pub struct Executor {
    client: Client,
    clob_url: String,
    rpc_url: String,
    secp: Secp256k1<secp256k1::All>,
    secret_key: SecretKey,
    /// Signer address (derived from private key)
    wallet_address: [u8; 20],
    /// Funder address (Polymarket profile where USDC is held)
    funder_address: [u8; 20],
    signature_type: SignatureType,
    credentials: Option<ApiCredentials>,
}

/// Convert u64 to big-endian 32-byte array
fn u64_to_bytes32(val: u64) -> [u8; 32] {
    let mut result = [0u8; 32];
    result[24..32].copy_from_slice(&val.to_be_bytes());
    result
}

/// Convert u128 to big-endian 32-byte array
fn u128_to_bytes32(val: u128) -> [u8; 32] {
    let mut result = [0u8; 32];
    result[16..32].copy_from_slice(&val.to_be_bytes());
    result
}

/// Parse a decimal string token ID (uint256) to bytes32
fn token_id_to_bytes32(token_id: &str) -> Result<[u8; 32]> {
    let bytes = decimal_to_bytes(token_id)?;
    let mut result = [0u8; 32];
    let start = 32 - bytes.len().min(32);
    result[start..].copy_from_slice(&bytes[..bytes.len().min(32)]);
    Ok(result)
}

/// Convert a decimal string to big-endian bytes (schoolbook base conversion,
/// token IDs exceed u128)
fn decimal_to_bytes(s: &str) -> Result<Vec<u8>> {
    let mut result = vec![0u8];

    for c in s.chars() {
        let digit = c
            .to_digit(10)
            .ok_or_else(|| anyhow!("Invalid decimal character in token id"))?
            as u16;

        let mut carry = digit;
        for byte in result.iter_mut().rev() {
            let val = (*byte as u16) * 10 + carry;
            *byte = (val & 0xFF) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            result.insert(0, (carry & 0xFF) as u8);
            carry >>= 8;
        }
    }

    Ok(result)
}

/// Convert bytes32 to a decimal string
fn bytes32_to_decimal(bytes: &[u8; 32]) -> String {
    let mut result = String::from("0");
    for &byte in bytes.iter() {
        let mut carry = byte as u32;
        let mut next = String::new();
        for c in result.chars().rev() {
            let digit = c.to_digit(10).unwrap_or(0);
            let val = digit * 256 + carry;
            carry = val / 10;
            next.insert(0, std::char::from_digit(val % 10, 10).unwrap_or('0'));
        }
        while carry > 0 {
            next.insert(0, std::char::from_digit(carry % 10, 10).unwrap_or('0'));
            carry /= 10;
        }
        result = next;
    }

    let trimmed = result.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Get public address from secret key
fn get_address(secp: &Secp256k1<secp256k1::All>, secret_key: &SecretKey) -> [u8; 20] {
    let public_key = PublicKey::from_secret_key(secp, secret_key);
    let public_key_bytes = &public_key.serialize_uncompressed()[1..];

    let hash = keccak256(public_key_bytes);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..32]);
    address
}

impl Executor {
    /// Create a new executor from a private key and derive API credentials.
    pub async fn new(private_key: &str, clob_url: Option<String>) -> Result<Self> {
        let private_key = private_key.strip_prefix("0x").unwrap_or(private_key);
        let key_bytes = hex::decode(private_key).context("Failed to decode private key")?;

        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&key_bytes).context("Invalid private key")?;

        let wallet_address = get_address(&secp, &secret_key);
        info!("Executor initialized for signer: 0x{}", hex::encode(wallet_address));

        // Separate funder address means a Magic/email wallet (signatureType=1)
        let (funder_address, signature_type) =
            if let Ok(funder_str) = std::env::var("POLYMARKET_WALLET_ADDRESS") {
                let funder_str = funder_str.strip_prefix("0x").unwrap_or(&funder_str);
                let funder_bytes =
                    hex::decode(funder_str).context("Invalid POLYMARKET_WALLET_ADDRESS")?;
                if funder_bytes.len() != 20 {
                    return Err(anyhow!("POLYMARKET_WALLET_ADDRESS must be 20 bytes"));
                }
                let mut arr = [0u8; 20];
                arr.copy_from_slice(&funder_bytes);

                if arr != wallet_address {
                    info!("Using Magic/email wallet mode (signatureType=1)");
                    info!("  Funder: 0x{}", hex::encode(arr));
                    info!("  Signer: 0x{}", hex::encode(wallet_address));
                    (arr, SignatureType::Poly)
                } else {
                    (arr, SignatureType::Eoa)
                }
            } else {
                (wallet_address, SignatureType::Eoa)
            };

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let clob_url = clob_url.unwrap_or_else(|| {
            std::env::var("POLYMARKET_CLOB_URL")
                .unwrap_or_else(|_| "https://clob.polymarket.com".to_string())
        });

        let rpc_url = std::env::var("POLYGON_RPC_URL")
            .unwrap_or_else(|_| "https://polygon-rpc.com".to_string());

        let mut executor = Self {
            client,
            clob_url,
            rpc_url,
            secp,
            secret_key,
            wallet_address,
            funder_address,
            signature_type,
            credentials: None,
        };

        executor.derive_api_key().await?;

        Ok(executor)
    }

    /// Derive API credentials using L1 authentication
    async fn derive_api_key(&mut self) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)?
            .as_secs()
            .to_string();

        let signature = self.create_l1_auth_signature(&timestamp, 0)?;

        let url = format!("{}/auth/derive-api-key", self.clob_url);

        let response = self
            .client
            .get(&url)
            .header("POLY_ADDRESS", format!("0x{}", hex::encode(self.wallet_address)))
            .header("POLY_SIGNATURE", &signature)
            .header("POLY_TIMESTAMP", &timestamp)
            .header("POLY_NONCE", "0")
            .send()
            .await
            .context("Failed to derive API key")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to derive API key: {} - {}", status, text));
        }

        let creds: ApiKeyResponse = response
            .json()
            .await
            .context("Failed to parse API key response")?;

        info!("API credentials derived successfully");

        self.credentials = Some(ApiCredentials {
            key: creds.api_key,
            secret: creds.secret,
            passphrase: creds.passphrase,
        });

        Ok(())
    }

    /// Create L1 authentication signature (EIP-712 ClobAuth)
    fn create_l1_auth_signature(&self, timestamp: &str, nonce: u64) -> Result<String> {
        let domain_separator = self.compute_clob_auth_domain();

        let message_str = "This message attests that I control the given wallet";
        let struct_hash =
            self.compute_clob_auth_struct_hash(&self.wallet_address, timestamp, nonce, message_str);

        let digest = compute_eip712_hash(&domain_separator, &struct_hash);
        let signature = self.sign_digest(digest);

        Ok(format!("0x{}", hex::encode(signature)))
    }

    /// Sign a 32-byte digest, returning the 65-byte r||s||v signature
    fn sign_digest(&self, digest: [u8; 32]) -> Vec<u8> {
        let msg = Message::from_digest(digest);
        let sig = self.secp.sign_ecdsa_recoverable(&msg, &self.secret_key);
        let (rec_id, sig_bytes) = sig.serialize_compact();

        let mut sig_with_v = Vec::with_capacity(65);
        sig_with_v.extend_from_slice(&sig_bytes);
        sig_with_v.push(27 + rec_id.to_i32() as u8);
        sig_with_v
    }

    fn compute_clob_auth_domain(&self) -> [u8; 32] {
        let type_hash = keccak256(b"EIP712Domain(string name,string version,uint256 chainId)");
        let name_hash = keccak256(b"ClobAuthDomain");
        let version_hash = keccak256(b"1");

        let mut encoded = Vec::new();
        encoded.extend_from_slice(&type_hash);
        encoded.extend_from_slice(&name_hash);
        encoded.extend_from_slice(&version_hash);
        encoded.extend_from_slice(&u64_to_bytes32(POLYGON_CHAIN_ID));

        keccak256(&encoded)
    }

    fn compute_clob_auth_struct_hash(
        &self,
        address: &[u8; 20],
        timestamp: &str,
        nonce: u64,
        message: &str,
    ) -> [u8; 32] {
        let type_hash =
            keccak256(b"ClobAuth(address address,string timestamp,uint256 nonce,string message)");

        let mut encoded = Vec::new();
        encoded.extend_from_slice(&type_hash);
        encoded.extend_from_slice(&[0u8; 12]);
        encoded.extend_from_slice(address);
        encoded.extend_from_slice(&keccak256(timestamp.as_bytes()));
        encoded.extend_from_slice(&u64_to_bytes32(nonce));
        encoded.extend_from_slice(&keccak256(message.as_bytes()));

        keccak256(&encoded)
    }

    /// Order domain separator for the CTF Exchange
    fn compute_order_domain(&self) -> Result<[u8; 32]> {
        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );

        let name_hash = keccak256(b"Polymarket CTF Exchange");
        let version_hash = keccak256(b"1");
        let contract = hex::decode(CTF_EXCHANGE).context("Invalid exchange address")?;

        let mut encoded = Vec::new();
        encoded.extend_from_slice(&type_hash);
        encoded.extend_from_slice(&name_hash);
        encoded.extend_from_slice(&version_hash);
        encoded.extend_from_slice(&u64_to_bytes32(POLYGON_CHAIN_ID));
        encoded.extend_from_slice(&[0u8; 12]);
        encoded.extend_from_slice(&contract);

        Ok(keccak256(&encoded))
    }

    fn compute_order_struct_hash(&self, order: &Order) -> [u8; 32] {
        let type_hash = keccak256(
            b"Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)",
        );

        let mut encoded = Vec::new();
        encoded.extend_from_slice(&type_hash);
        let mut salt_bytes = [0u8; 32];
        salt_bytes[24..].copy_from_slice(&order.salt.to_be_bytes());
        encoded.extend_from_slice(&salt_bytes);
        encoded.extend_from_slice(&[0u8; 12]);
        encoded.extend_from_slice(&order.maker);
        encoded.extend_from_slice(&[0u8; 12]);
        encoded.extend_from_slice(&order.signer);
        encoded.extend_from_slice(&[0u8; 12]);
        encoded.extend_from_slice(&order.taker);
        encoded.extend_from_slice(&order.token_id);
        encoded.extend_from_slice(&order.maker_amount);
        encoded.extend_from_slice(&order.taker_amount);
        encoded.extend_from_slice(&order.expiration);
        encoded.extend_from_slice(&order.nonce);
        encoded.extend_from_slice(&order.fee_rate_bps);
        let mut side_bytes = [0u8; 32];
        side_bytes[31] = order.side as u8;
        encoded.extend_from_slice(&side_bytes);
        let mut sig_type_bytes = [0u8; 32];
        sig_type_bytes[31] = order.signature_type as u8;
        encoded.extend_from_slice(&sig_type_bytes);

        keccak256(&encoded)
    }

    fn sign_order(&self, order: &mut Order) -> Result<()> {
        let domain = self.compute_order_domain()?;
        let struct_hash = self.compute_order_struct_hash(order);
        let digest = compute_eip712_hash(&domain, &struct_hash);
        order.signature = self.sign_digest(digest);
        Ok(())
    }

    /// Create HMAC signature for an L2 API request
    fn create_hmac_signature(
        &self,
        secret: &str,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String> {
        let message = format!("{}{}{}{}", timestamp, method, path, body);

        let secret_bytes = BASE64_URL
            .decode(secret)
            .context("Failed to decode API secret")?;

        let mut mac =
            Hmac::<Sha256>::new_from_slice(&secret_bytes).context("Failed to create HMAC")?;
        mac.update(message.as_bytes());

        Ok(BASE64_URL.encode(mac.finalize().into_bytes()))
    }

    /// Build a buy order for a fixed share count at a limit price.
    ///
    /// For BUY: makerAmount = USDC spent, takerAmount = shares received. The
    /// CLOB requires the price on a 0.01 tick and makerAmount = price x
    /// takerAmount exactly; both are submitted in 6-decimal fixed point.
    fn create_buy_order(&self, token_id: &str, price: f64, shares: f64) -> Result<Order> {
        let rounded_price = (price * 100.0).floor() / 100.0;
        let rounded_shares = (shares * 100.0).floor() / 100.0;
        if rounded_price <= 0.0 || rounded_shares <= 0.0 {
            return Err(anyhow!(
                "Buy order too small after rounding: {:.4} shares @ {:.4}",
                rounded_shares,
                rounded_price
            ));
        }
        let exact_usdc = rounded_price * rounded_shares;

        let maker_amount = ((exact_usdc * 10000.0).round() as u128) * 100;
        let taker_amount = ((rounded_shares * 100.0).round() as u128) * 10000;

        debug!(
            "Order calc: {:.2} shares @ {:.4} = ${:.4} (maker={}, taker={})",
            rounded_shares, rounded_price, exact_usdc, maker_amount, taker_amount
        );

        let salt = (rand::random::<u64>() % 1_000_000_000) as i64;

        Ok(Order {
            salt,
            maker: self.funder_address,
            signer: self.wallet_address,
            // Zero taker: public order, anyone can fill
            taker: [0u8; 20],
            token_id: token_id_to_bytes32(token_id)?,
            maker_amount: u128_to_bytes32(maker_amount),
            taker_amount: u128_to_bytes32(taker_amount),
            expiration: u64_to_bytes32(0),
            nonce: u64_to_bytes32(0),
            fee_rate_bps: [0u8; 32],
            side: Side::Buy,
            signature_type: self.signature_type,
            signature: Vec::new(),
        })
    }

    fn to_signed_order(&self, order: &Order) -> SignedOrder {
        SignedOrder {
            salt: order.salt,
            maker: format!("0x{}", hex::encode(order.maker)),
            signer: format!("0x{}", hex::encode(order.signer)),
            taker: format!("0x{}", hex::encode(order.taker)),
            token_id: bytes32_to_decimal(&order.token_id),
            maker_amount: bytes32_to_decimal(&order.maker_amount),
            taker_amount: bytes32_to_decimal(&order.taker_amount),
            expiration: bytes32_to_decimal(&order.expiration),
            nonce: bytes32_to_decimal(&order.nonce),
            fee_rate_bps: bytes32_to_decimal(&order.fee_rate_bps),
            side: if order.side == Side::Buy { "BUY" } else { "SELL" }.to_string(),
            signature_type: order.signature_type as u8,
            signature: format!("0x{}", hex::encode(&order.signature)),
        }
    }

    /// Submit a signed order as GTC
    async fn submit_order(&self, order: &Order) -> Result<OrderResponse> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| anyhow!("API credentials not initialized"))?;

        let request = OrderRequest {
            order: self.to_signed_order(order),
            owner: creds.key.clone(),
            order_type: "GTC",
        };

        let body = serde_json::to_string(&request)?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)?
            .as_secs()
            .to_string();

        let path = "/order";
        let signature = self.create_hmac_signature(&creds.secret, &timestamp, "POST", path, &body)?;

        let url = format!("{}{}", self.clob_url, path);
        debug!("Submitting order to {url}");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("POLY_ADDRESS", format!("0x{}", hex::encode(self.wallet_address)))
            .header("POLY_API_KEY", &creds.key)
            .header("POLY_PASSPHRASE", &creds.passphrase)
            .header("POLY_SIGNATURE", &signature)
            .header("POLY_TIMESTAMP", &timestamp)
            .body(body)
            .send()
            .await
            .context("Failed to submit order")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!("Order submission failed: {} - {}", status, text);
            return Err(anyhow!("Order submission failed: {} - {}", status, text));
        }

        let result: OrderResponse =
            serde_json::from_str(&text).context("Failed to parse order response")?;

        Ok(result)
    }

    /// Buy `shares` of a token at the given limit price. A gateway-reported
    /// rejection is an error - the caller must see it, not silently retry.
    pub async fn market_buy(&self, token_id: &str, price: f64, shares: f64) -> Result<OrderResponse> {
        let mut order = self.create_buy_order(token_id, price, shares)?;
        self.sign_order(&mut order)?;

        let response = self.submit_order(&order).await?;
        if !response.success {
            return Err(anyhow!(
                "Order rejected: {}",
                response.error_msg.as_deref().unwrap_or("unknown error")
            ));
        }

        info!("Order placed: {:?}", response.order_id);
        Ok(response)
    }

    /// Get signer wallet address as hex string
    pub fn wallet_address(&self) -> String {
        format!("0x{}", hex::encode(self.wallet_address))
    }

    // ------------------------------------------------------------------
    // On-chain redemption
    // ------------------------------------------------------------------

    /// Redeem a winning position through the CTF contract.
    ///
    /// Builds the redeemPositions calldata, signs a legacy EIP-155
    /// transaction with the executor's key, and submits it over Polygon
    /// JSON-RPC. Waits briefly for the receipt; a reverted transaction is an
    /// error.
    pub async fn redeem_winning_position(
        &self,
        condition_id: &str,
        token_id: &str,
        outcome: &str,
    ) -> Result<RedeemReceipt> {
        let calldata = build_redeem_calldata(condition_id, outcome)?;
        let to = hex_to_array20(CTF_CONTRACT)?;

        let from = format!("0x{}", hex::encode(self.wallet_address));
        let nonce = self
            .rpc_quantity("eth_getTransactionCount", serde_json::json!([from, "pending"]))
            .await
            .context("Failed to fetch transaction nonce")?;
        let gas_price = self
            .rpc_quantity("eth_gasPrice", serde_json::json!([]))
            .await
            .context("Failed to fetch gas price")?;

        let gas = match self
            .rpc_quantity(
                "eth_estimateGas",
                serde_json::json!([{
                    "from": from,
                    "to": format!("0x{CTF_CONTRACT}"),
                    "data": format!("0x{}", hex::encode(&calldata)),
                }]),
            )
            .await
        {
            Ok(estimate) => estimate + estimate / 4,
            Err(e) => {
                debug!("Gas estimation failed, using fallback: {e}");
                REDEEM_GAS_FALLBACK
            }
        };

        let raw_tx = self.sign_legacy_transaction(nonce, gas_price, gas, &to, &calldata);

        info!(
            "Redeeming {} position (token {}...) for condition {}...",
            outcome,
            &token_id[..16.min(token_id.len())],
            &condition_id[..16.min(condition_id.len())]
        );

        let result = self
            .rpc_call(
                "eth_sendRawTransaction",
                serde_json::json!([format!("0x{}", hex::encode(&raw_tx))]),
            )
            .await
            .context("Failed to broadcast redemption transaction")?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| anyhow!("Invalid transaction hash in RPC response"))?
            .to_string();

        self.await_receipt(&tx_hash).await?;
        info!("Redemption confirmed: {tx_hash}");

        Ok(RedeemReceipt { tx_hash })
    }

    /// Sign an EIP-155 legacy transaction, returning the raw RLP bytes.
    fn sign_legacy_transaction(
        &self,
        nonce: u128,
        gas_price: u128,
        gas: u128,
        to: &[u8; 20],
        data: &[u8],
    ) -> Vec<u8> {
        let unsigned = rlp_encode_list(&[
            rlp_encode_uint(nonce),
            rlp_encode_uint(gas_price),
            rlp_encode_uint(gas),
            rlp_encode_bytes(to),
            rlp_encode_uint(0), // value
            rlp_encode_bytes(data),
            rlp_encode_uint(POLYGON_CHAIN_ID as u128),
            rlp_encode_uint(0),
            rlp_encode_uint(0),
        ]);

        let digest = keccak256(&unsigned);
        let msg = Message::from_digest(digest);
        let sig = self.secp.sign_ecdsa_recoverable(&msg, &self.secret_key);
        let (rec_id, sig_bytes) = sig.serialize_compact();

        let v = POLYGON_CHAIN_ID as u128 * 2 + 35 + rec_id.to_i32() as u128;
        let r = strip_leading_zeros(&sig_bytes[..32]);
        let s = strip_leading_zeros(&sig_bytes[32..]);

        rlp_encode_list(&[
            rlp_encode_uint(nonce),
            rlp_encode_uint(gas_price),
            rlp_encode_uint(gas),
            rlp_encode_bytes(to),
            rlp_encode_uint(0),
            rlp_encode_bytes(data),
            rlp_encode_uint(v),
            rlp_encode_bytes(&r),
            rlp_encode_bytes(&s),
        ])
    }

    /// Poll for the transaction receipt; errors when the transaction
    /// reverted, succeeds once mined or after polling gives up.
    async fn await_receipt(&self, tx_hash: &str) -> Result<()> {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let receipt = self
                .rpc_call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
                .await?;
            if receipt.is_null() {
                continue;
            }
            let status = receipt.get("status").and_then(|s| s.as_str()).unwrap_or("");
            if status == "0x0" {
                return Err(anyhow!("Redemption transaction reverted: {tx_hash}"));
            }
            return Ok(());
        }
        warn!("Redemption receipt not seen yet, assuming pending: {tx_hash}");
        Ok(())
    }

    async fn rpc_call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("RPC request failed: {method}"))?;

        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse RPC response: {method}"))?;

        if let Some(error) = body.get("error") {
            return Err(anyhow!("RPC error from {method}: {error}"));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("RPC response missing result: {method}"))
    }

    async fn rpc_quantity(&self, method: &str, params: serde_json::Value) -> Result<u128> {
        let result = self.rpc_call(method, params).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| anyhow!("Expected hex quantity from {method}"))?;
        parse_hex_quantity(hex_str)
    }
}

/// keccak(0x1901 || domain || struct)
fn compute_eip712_hash(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(66);
    encoded.extend_from_slice(&[0x19, 0x01]);
    encoded.extend_from_slice(domain_separator);
    encoded.extend_from_slice(struct_hash);
    keccak256(&encoded)
}

/// Keccak256 hash helper
fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// ABI-encode the redeemPositions call: collateral token, zero parent
/// collection, the condition id as bytes32, and a single-element index set
/// array (1 = Up, 2 = Down).
fn build_redeem_calldata(condition_id: &str, outcome: &str) -> Result<Vec<u8>> {
    let index_set: u64 = if outcome.to_uppercase().contains("UP") || outcome == "1" {
        1
    } else {
        2
    };

    let condition_clean = condition_id.strip_prefix("0x").unwrap_or(condition_id);
    let condition_bytes =
        hex::decode(condition_clean).context("Invalid condition id hex")?;
    if condition_bytes.len() > 32 {
        return Err(anyhow!("Condition id longer than 32 bytes"));
    }
    let mut condition32 = [0u8; 32];
    condition32[32 - condition_bytes.len()..].copy_from_slice(&condition_bytes);

    let usdc = hex_to_array20(USDC_ADDRESS)?;

    let mut calldata = Vec::with_capacity(4 + 6 * 32);
    calldata.extend_from_slice(&REDEEM_SELECTOR);
    calldata.extend_from_slice(&[0u8; 12]);
    calldata.extend_from_slice(&usdc);
    calldata.extend_from_slice(&[0u8; 32]); // parentCollectionId
    calldata.extend_from_slice(&condition32);
    calldata.extend_from_slice(&u64_to_bytes32(32 * 4)); // indexSets offset
    calldata.extend_from_slice(&u64_to_bytes32(1)); // indexSets length
    calldata.extend_from_slice(&u64_to_bytes32(index_set));

    Ok(calldata)
}

fn hex_to_array20(s: &str) -> Result<[u8; 20]> {
    let bytes = hex::decode(s).context("Invalid address hex")?;
    if bytes.len() != 20 {
        return Err(anyhow!("Address must be 20 bytes"));
    }
    let mut arr = [0u8; 20];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

fn parse_hex_quantity(s: &str) -> Result<u128> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    if trimmed.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(trimmed, 16).with_context(|| format!("Invalid hex quantity: {s}"))
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

// ------------------------------------------------------------------
// Minimal RLP encoding (legacy transactions only)
// ------------------------------------------------------------------

fn rlp_encode_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        return bytes.to_vec();
    }
    let mut out = rlp_length_prefix(bytes.len(), 0x80);
    out.extend_from_slice(bytes);
    out
}

fn rlp_encode_uint(val: u128) -> Vec<u8> {
    let bytes = val.to_be_bytes();
    rlp_encode_bytes(&strip_leading_zeros(&bytes))
}

fn rlp_encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.iter().flatten().copied().collect();
    let mut out = rlp_length_prefix(payload.len(), 0xc0);
    out.extend_from_slice(&payload);
    out
}

fn rlp_length_prefix(len: usize, base: u8) -> Vec<u8> {
    if len <= 55 {
        vec![base + len as u8]
    } else {
        let len_bytes = strip_leading_zeros(&(len as u64).to_be_bytes());
        let mut out = vec![base + 55 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rlp_encode_empty_and_small() {
        // Empty byte string encodes to 0x80, zero uint is the empty string.
        assert_eq!(rlp_encode_bytes(&[]), vec![0x80]);
        assert_eq!(rlp_encode_uint(0), vec![0x80]);
        // Single byte below 0x80 encodes as itself.
        assert_eq!(rlp_encode_bytes(&[0x7f]), vec![0x7f]);
        assert_eq!(rlp_encode_uint(15), vec![0x0f]);
    }

    #[test]
    fn test_rlp_encode_short_string() {
        // "dog" -> 0x83 'd' 'o' 'g'
        assert_eq!(rlp_encode_bytes(b"dog"), vec![0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn test_rlp_encode_list() {
        // ["cat", "dog"] -> 0xc8 0x83 c a t 0x83 d o g
        let encoded = rlp_encode_list(&[rlp_encode_bytes(b"cat"), rlp_encode_bytes(b"dog")]);
        assert_eq!(
            encoded,
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn test_rlp_long_string_prefix() {
        let data = vec![0xaau8; 60];
        let encoded = rlp_encode_bytes(&data);
        assert_eq!(encoded[0], 0xb8);
        assert_eq!(encoded[1], 60);
        assert_eq!(encoded.len(), 62);
    }

    #[test]
    fn test_decimal_bytes_roundtrip() {
        let token_id = "21742633143463906290569050155826241533067272736897614950488156847949938836455";
        let bytes32 = token_id_to_bytes32(token_id).unwrap();
        assert_eq!(bytes32_to_decimal(&bytes32), token_id);
    }

    #[test]
    fn test_decimal_small_values() {
        assert_eq!(bytes32_to_decimal(&u64_to_bytes32(0)), "0");
        assert_eq!(bytes32_to_decimal(&u64_to_bytes32(1234)), "1234");
    }

    #[test]
    fn test_redeem_calldata_layout() {
        let calldata =
            build_redeem_calldata("0xabcdef", "Up").unwrap();
        assert_eq!(calldata.len(), 4 + 6 * 32);
        assert_eq!(&calldata[..4], &REDEEM_SELECTOR);
        // Last word is the index set: 1 for Up.
        assert_eq!(calldata[4 + 6 * 32 - 1], 1);

        let down = build_redeem_calldata("0xabcdef", "Down").unwrap();
        assert_eq!(down[4 + 6 * 32 - 1], 2);
    }

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_hex_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_hex_quantity("ff").unwrap(), 255);
        assert!(parse_hex_quantity("0xzz").is_err());
    }
}
