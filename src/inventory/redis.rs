//! Redis-backed inventory engine.
//!
//! Reserve and rollback run as Lua scripts so the stock check, the per-user
//! cap check and both counter mutations happen in one atomic step server-side.

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::debug;

use super::{info_key, users_key, TicketInfo, TicketInventory};
use crate::errors::{AppError, Result};
use async_trait::async_trait;

/// Script result codes shared with the Lua sources below.
const RESERVED: i64 = 1;
const ERR_INSUFFICIENT_STOCK: i64 = -1;
const ERR_EXCEEDS_LIMIT: i64 = -2;
const ERR_NOT_WARMED: i64 = -3;

/// KEYS[1] = info hash, KEYS[2] = users hash,
/// ARGV[1] = user id, ARGV[2] = quantity.
/// Returns {code, unit price as string}.
const RESERVE_SCRIPT: &str = r#"
local ticket_key = KEYS[1]
local users_key = KEYS[2]
local user_id = tonumber(ARGV[1])
local request_qty = tonumber(ARGV[2])

local ticket_info = redis.call('HMGET', ticket_key, 'stock', 'price', 'limit')
local stock = ticket_info[1]
local price = ticket_info[2]
local limit = ticket_info[3]

if not stock or not price or not limit then
    return {-3, '0.0'}
end

if tonumber(stock) < request_qty then
    return {-1, '0.0'}
end

local user_bought = redis.call('HGET', users_key, user_id) or '0'
if tonumber(user_bought) + request_qty > tonumber(limit) then
    return {-2, '0.0'}
end

redis.call('HINCRBY', ticket_key, 'stock', -request_qty)
redis.call('HINCRBY', users_key, user_id, request_qty)

return {1, tostring(price)}
"#;

/// KEYS[1] = info hash, KEYS[2] = users hash,
/// ARGV[1] = user id, ARGV[2] = quantity.
const ROLLBACK_SCRIPT: &str = r#"
local ticket_key = KEYS[1]
local users_key = KEYS[2]
local user_id = tonumber(ARGV[1])
local rollback_qty = tonumber(ARGV[2])

redis.call('HINCRBY', ticket_key, 'stock', rollback_qty)
redis.call('HINCRBY', users_key, user_id, -rollback_qty)

return 'OK'
"#;

/// Redis implementation of the inventory engine.
pub struct RedisTicketInventory {
    conn: ConnectionManager,
    reserve_script: Script,
    rollback_script: Script,
}

impl RedisTicketInventory {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            reserve_script: Script::new(RESERVE_SCRIPT),
            rollback_script: Script::new(ROLLBACK_SCRIPT),
        }
    }
}

#[async_trait]
impl TicketInventory for RedisTicketInventory {
    async fn warm_up(&self, ticket_id: i32, stock: i32, price: f64, limit: i32) -> Result<()> {
        let mut conn = self.conn.clone();
        let items = [
            ("stock", stock.to_string()),
            ("price", price.to_string()),
            ("limit", limit.to_string()),
        ];
        let _: () = conn.hset_multiple(info_key(ticket_id), &items).await?;

        debug!(ticket_id, stock, price, limit, "Warmed up ticket inventory");
        Ok(())
    }

    async fn stock(&self, ticket_id: i32) -> Result<i32> {
        let mut conn = self.conn.clone();
        let stock: Option<i32> = conn.hget(info_key(ticket_id), "stock").await?;
        stock.ok_or(AppError::TicketNotFound)
    }

    async fn info(&self, ticket_id: i32) -> Result<TicketInfo> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(info_key(ticket_id)).await?;

        if fields.is_empty() {
            return Err(AppError::TicketNotFound);
        }

        let parse = |name: &str| -> Result<&String> {
            fields
                .get(name)
                .ok_or_else(|| AppError::Internal(format!("inventory entry missing {name}")))
        };

        Ok(TicketInfo {
            stock: parse("stock")?
                .parse()
                .map_err(|e| AppError::Internal(format!("invalid stock: {e}")))?,
            price: parse("price")?
                .parse()
                .map_err(|e| AppError::Internal(format!("invalid price: {e}")))?,
            limit: parse("limit")?
                .parse()
                .map_err(|e| AppError::Internal(format!("invalid limit: {e}")))?,
        })
    }

    async fn reserve(&self, ticket_id: i32, quantity: i32, user_id: i32) -> Result<f64> {
        let mut conn = self.conn.clone();
        let (code, price): (i64, String) = self
            .reserve_script
            .key(info_key(ticket_id))
            .key(users_key(ticket_id))
            .arg(user_id)
            .arg(quantity)
            .invoke_async(&mut conn)
            .await?;

        match code {
            RESERVED => price
                .parse()
                .map_err(|e| AppError::Internal(format!("invalid price from script: {e}"))),
            ERR_INSUFFICIENT_STOCK => Err(AppError::InsufficientStock),
            ERR_EXCEEDS_LIMIT => Err(AppError::ExceedsMaxPerUser),
            ERR_NOT_WARMED => Err(AppError::TicketNotFound),
            other => Err(AppError::Internal(format!(
                "unexpected reserve script result: {other}"
            ))),
        }
    }

    async fn rollback(&self, ticket_id: i32, quantity: i32, user_id: i32) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = self
            .rollback_script
            .key(info_key(ticket_id))
            .key(users_key(ticket_id))
            .arg(user_id)
            .arg(quantity)
            .invoke_async(&mut conn)
            .await?;

        debug!(ticket_id, quantity, user_id, "Rolled back reservation");
        Ok(())
    }
}
