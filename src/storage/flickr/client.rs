//! 基于 reqwest 的 Flickr 客户端（OAuth 1.0a / HMAC-SHA1 签名）

use super::api::{lenient_u32, Page, Photo, PhotoApi, Photoset, UploadRequest, User};
use super::auth::{AccessToken, TokenStore, Verifier};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha1::Sha1;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

const REST_URL: &str = "https://api.flickr.com/services/rest/";
const UPLOAD_URL: &str = "https://up.flickr.com/services/upload/";
const REQUEST_TOKEN_URL: &str = "https://www.flickr.com/services/oauth/request_token";
const AUTHORIZE_URL: &str = "https://www.flickr.com/services/oauth/authorize";
const ACCESS_TOKEN_URL: &str = "https://www.flickr.com/services/oauth/access_token";

const OAUTH_PERMISSIONS: &str = "write";
const EXTRAS: &str = "original_format,tags,url_o";
const PER_PAGE: &str = "500";

/// 连接超时（秒）
const CONNECT_TIMEOUT_SECS: u64 = 30;
/// 单个请求超时（秒），上传/下载大文件需要较长时间
const REQUEST_TIMEOUT_SECS: u64 = 600;

/// 服务端错误码：无效凭据 / 权限不足 / 服务暂不可用
const ERR_INVALID_AUTH: i64 = 98;
const ERR_INSUFFICIENT_PERMS: i64 = 99;
const ERR_SERVICE_UNAVAILABLE: i64 = 105;

type HmacSha1 = Hmac<Sha1>;

pub struct FlickrClient {
    http: reqwest::Client,
    api_key: String,
    api_secret: String,
    store: TokenStore,
    verifier: Box<dyn Verifier>,
    token: RwLock<Option<AccessToken>>,
}

// ============ 响应结构 ============

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(rename = "_content", default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    user: LoginUser,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    id: String,
    username: Content,
}

#[derive(Debug, Deserialize)]
struct PhotosetWire {
    id: String,
    #[serde(default)]
    title: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct PhotosetsResponse {
    photosets: PhotosetsPage,
}

#[derive(Debug, Deserialize)]
struct PhotosetsPage {
    #[serde(default, deserialize_with = "lenient_u32")]
    page: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    pages: u32,
    #[serde(default)]
    photoset: Vec<PhotosetWire>,
}

#[derive(Debug, Deserialize)]
struct PhotosPage {
    #[serde(default, deserialize_with = "lenient_u32")]
    page: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    pages: u32,
    #[serde(default)]
    photo: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct PhotosetPhotosResponse {
    photoset: PhotosPage,
}

#[derive(Debug, Deserialize)]
struct NotInSetResponse {
    photos: PhotosPage,
}

#[derive(Debug, Deserialize)]
struct CreatePhotosetResponse {
    photoset: PhotosetWire,
}

#[derive(Debug, Deserialize)]
struct SizesResponse {
    sizes: Sizes,
}

#[derive(Debug, Deserialize)]
struct Sizes {
    #[serde(default)]
    size: Vec<Size>,
}

#[derive(Debug, Deserialize)]
struct Size {
    label: String,
    source: String,
}

#[derive(Debug, Deserialize)]
struct Ignored {}

impl From<PhotosPage> for Page<Photo> {
    fn from(p: PhotosPage) -> Self {
        Page {
            page: p.page,
            pages: p.pages,
            items: p.photo,
        }
    }
}

impl From<PhotosetWire> for Photoset {
    fn from(w: PhotosetWire) -> Self {
        Photoset {
            id: w.id,
            title: w.title.map(|t| t.content).unwrap_or_default(),
        }
    }
}

// ============ 签名 ============

/// RFC 3986 百分号编码
fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// 计算 OAuth 1.0a 签名
fn signature(
    method: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String> {
    let param_str = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let base = format!("{}&{}&{}", method, encode(url), encode(&param_str));
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));

    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| SyncError::Auth(format!("签名密钥无效: {}", e)))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// 从上传接口的 XML 响应中取出照片 id
fn parse_upload_response(body: &str) -> Result<String> {
    if let Some(start) = body.find("<photoid>") {
        let rest = &body[start + "<photoid>".len()..];
        if let Some(end) = rest.find("</photoid>") {
            return Ok(rest[..end].trim().to_string());
        }
    }

    let msg = body
        .find("msg=\"")
        .map(|i| &body[i + 5..])
        .and_then(|rest| rest.find('"').map(|end| &rest[..end]))
        .unwrap_or("无法解析上传响应");
    Err(SyncError::Api(format!("上传失败: {}", msg)))
}

/// 把 `stat=fail` 的响应映射成错误
fn check_stat(value: &serde_json::Value) -> Result<()> {
    if value.get("stat").and_then(|s| s.as_str()) != Some("fail") {
        return Ok(());
    }
    let code = value.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
    let message = value
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown error")
        .to_string();
    Err(match code {
        ERR_INVALID_AUTH | ERR_INSUFFICIENT_PERMS => SyncError::Auth(message),
        ERR_SERVICE_UNAVAILABLE => SyncError::Network(message),
        _ => SyncError::Api(format!("{} (code {})", message, code)),
    })
}

/// 登录校验失败时的错误：暂时性错误保持原样以便重试，其余视为授权失败
fn login_error(e: SyncError) -> SyncError {
    match e {
        SyncError::Auth(_) | SyncError::Network(_) => e,
        other => SyncError::Auth(other.to_string()),
    }
}

impl FlickrClient {
    pub fn new(
        api_key: &str,
        api_secret: &str,
        store: TokenStore,
        verifier: Box<dyn Verifier>,
    ) -> Result<Self> {
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(SyncError::Config(
                "使用 flickr 需要设置 api_key 和 api_secret".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            store,
            verifier,
            token: RwLock::new(None),
        })
    }

    /// 补齐 oauth_* 参数并签名
    fn sign_params(
        &self,
        method: &str,
        url: &str,
        mut params: BTreeMap<String, String>,
        token: Option<(&str, &str)>,
    ) -> Result<BTreeMap<String, String>> {
        params.insert("oauth_consumer_key".into(), self.api_key.clone());
        params.insert("oauth_nonce".into(), uuid::Uuid::new_v4().simple().to_string());
        params.insert("oauth_signature_method".into(), "HMAC-SHA1".into());
        params.insert(
            "oauth_timestamp".into(),
            chrono::Utc::now().timestamp().to_string(),
        );
        params.insert("oauth_version".into(), "1.0".into());

        let token_secret = match token {
            Some((key, secret)) => {
                params.insert("oauth_token".into(), key.to_string());
                secret
            }
            None => "",
        };

        let sig = signature(method, url, &params, &self.api_secret, token_secret)?;
        params.insert("oauth_signature".into(), sig);
        Ok(params)
    }

    /// 授权流程中的 GET 请求，响应是 form 编码
    async fn oauth_get(
        &self,
        url: &str,
        params: BTreeMap<String, String>,
        token: Option<(&str, &str)>,
    ) -> Result<HashMap<String, String>> {
        let signed = self.sign_params("GET", url, params, token)?;
        let resp = self
            .http
            .get(url)
            .query(&signed)
            .send()
            .await
            .map_err(|e| SyncError::Auth(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SyncError::Auth(e.to_string()))?;
        if !status.is_success() {
            return Err(SyncError::Auth(format!("{}: {}", status, body)));
        }

        serde_urlencoded::from_str(&body).map_err(|e| SyncError::Auth(e.to_string()))
    }

    /// 交互授权：request token -> 用户授权 -> access token
    async fn authorize(&self) -> Result<AccessToken> {
        let mut params = BTreeMap::new();
        params.insert("oauth_callback".to_string(), "oob".to_string());
        let request = self.oauth_get(REQUEST_TOKEN_URL, params, None).await?;

        let request_token = request
            .get("oauth_token")
            .cloned()
            .ok_or_else(|| SyncError::Auth("缺少 oauth_token".to_string()))?;
        let request_secret = request
            .get("oauth_token_secret")
            .cloned()
            .unwrap_or_default();

        let url = format!(
            "{}?oauth_token={}&perms={}",
            AUTHORIZE_URL,
            encode(&request_token),
            OAUTH_PERMISSIONS
        );
        let verifier = self.verifier.verify(&url)?;

        let mut params = BTreeMap::new();
        params.insert("oauth_verifier".to_string(), verifier);
        let access = self
            .oauth_get(
                ACCESS_TOKEN_URL,
                params,
                Some((&request_token, &request_secret)),
            )
            .await?;

        let field = |name: &str| access.get(name).cloned();
        Ok(AccessToken {
            token: field("oauth_token")
                .ok_or_else(|| SyncError::Auth("缺少 oauth_token".to_string()))?,
            secret: field("oauth_token_secret").unwrap_or_default(),
            user_nsid: field("user_nsid"),
            username: field("username"),
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    /// 调用 REST 方法
    async fn rest<T: DeserializeOwned>(&self, method: &str, args: &[(&str, &str)]) -> Result<T> {
        let mut params = BTreeMap::new();
        params.insert("method".to_string(), method.to_string());
        params.insert("format".to_string(), "json".to_string());
        params.insert("nojsoncallback".to_string(), "1".to_string());
        for (k, v) in args {
            params.insert(k.to_string(), v.to_string());
        }

        let token = self.token.read().await.clone();
        let signed = self.sign_params(
            "GET",
            REST_URL,
            params,
            token.as_ref().map(|t| (t.token.as_str(), t.secret.as_str())),
        )?;

        debug!("调用 {}", method);
        let resp = self
            .http
            .get(REST_URL)
            .query(&signed)
            .send()
            .await?
            .error_for_status()?;
        let body = resp.text().await?;

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| SyncError::Api(format!("{} 返回了无效的 JSON: {}", method, e)))?;
        check_stat(&value)?;
        serde_json::from_value(value)
            .map_err(|e| SyncError::Api(format!("{} 响应格式不符: {}", method, e)))
    }

    /// 原图地址：优先用列表里的 url_o，否则查询尺寸列表
    async fn original_url(&self, photo: &Photo) -> Result<String> {
        if let Some(url) = photo.url_o.as_ref().filter(|u| !u.is_empty()) {
            return Ok(url.clone());
        }

        let sizes: SizesResponse = self
            .rest("flickr.photos.getSizes", &[("photo_id", &photo.id)])
            .await?;
        sizes
            .sizes
            .size
            .iter()
            .find(|s| s.label == "Original")
            .or_else(|| sizes.sizes.size.last())
            .map(|s| s.source.clone())
            .ok_or_else(|| SyncError::NotFound(format!("照片 {} 没有可下载的尺寸", photo.id)))
    }
}

#[async_trait]
impl PhotoApi for FlickrClient {
    async fn login(&self) -> Result<User> {
        let token = match self.store.load()? {
            Some(token) => token,
            None => {
                info!("未找到授权凭据，开始交互授权");
                let token = self.authorize().await?;
                self.store.save(&token)?;
                info!("授权完成，凭据已保存到 {:?}", self.store.path());
                token
            }
        };
        *self.token.write().await = Some(token);

        let resp: LoginResponse = self
            .rest("flickr.test.login", &[])
            .await
            .map_err(login_error)?;
        Ok(User {
            id: resp.user.id,
            username: resp.user.username.content,
        })
    }

    async fn photosets(&self, user: &User, page: u32) -> Result<Page<Photoset>> {
        let page = page.to_string();
        let resp: PhotosetsResponse = self
            .rest(
                "flickr.photosets.getList",
                &[("user_id", &user.id), ("page", &page), ("per_page", PER_PAGE)],
            )
            .await?;
        Ok(Page {
            page: resp.photosets.page,
            pages: resp.photosets.pages,
            items: resp.photosets.photoset.into_iter().map(Photoset::from).collect(),
        })
    }

    async fn photoset_photos(&self, photoset_id: &str, page: u32) -> Result<Page<Photo>> {
        let page = page.to_string();
        let resp: PhotosetPhotosResponse = self
            .rest(
                "flickr.photosets.getPhotos",
                &[
                    ("photoset_id", photoset_id),
                    ("extras", EXTRAS),
                    ("page", &page),
                    ("per_page", PER_PAGE),
                ],
            )
            .await?;
        Ok(resp.photoset.into())
    }

    async fn photos_not_in_set(&self, page: u32) -> Result<Page<Photo>> {
        let page = page.to_string();
        let resp: NotInSetResponse = self
            .rest(
                "flickr.photos.getNotInSet",
                &[("extras", EXTRAS), ("page", &page), ("per_page", PER_PAGE)],
            )
            .await?;
        Ok(resp.photos.into())
    }

    async fn download(&self, photo: &Photo, dest: &Path) -> Result<()> {
        let url = self.original_url(photo).await?;
        let resp = self.http.get(&url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn upload(&self, src: &Path, request: &UploadRequest) -> Result<String> {
        let flag = |b: bool| (if b { "1" } else { "0" }).to_string();
        let mut params = BTreeMap::new();
        params.insert("title".to_string(), request.title.clone());
        params.insert("tags".to_string(), request.tags.clone());
        params.insert("is_public".to_string(), flag(request.is_public));
        params.insert("is_friend".to_string(), flag(request.is_friend));
        params.insert("is_family".to_string(), flag(request.is_family));

        let token = self.token.read().await.clone();
        let signed = self.sign_params(
            "POST",
            UPLOAD_URL,
            params,
            token.as_ref().map(|t| (t.token.as_str(), t.secret.as_str())),
        )?;

        let file = tokio::fs::File::open(src).await?;
        let len = file.metadata().await?.len();
        let file_name = src
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("photo")
            .to_string();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, len).file_name(file_name);

        let form = signed
            .into_iter()
            .fold(Form::new(), |form, (k, v)| form.text(k, v))
            .part("photo", part);

        let resp = self
            .http
            .post(UPLOAD_URL)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body = resp.text().await?;
        parse_upload_response(&body)
    }

    async fn create_photoset(&self, title: &str, primary_photo_id: &str) -> Result<Photoset> {
        let resp: CreatePhotosetResponse = self
            .rest(
                "flickr.photosets.create",
                &[("title", title), ("primary_photo_id", primary_photo_id)],
            )
            .await?;
        Ok(Photoset {
            id: resp.photoset.id,
            title: title.to_string(),
        })
    }

    async fn add_photo(&self, photoset_id: &str, photo_id: &str) -> Result<()> {
        let _: Ignored = self
            .rest(
                "flickr.photosets.addPhoto",
                &[("photoset_id", photoset_id), ("photo_id", photo_id)],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matches_known_example() {
        // 公开的 OAuth 1.0a HMAC-SHA1 签名示例
        let mut params = BTreeMap::new();
        for (k, v) in [
            ("status", "Hello Ladies + Gentlemen, a signed OAuth request!"),
            ("include_entities", "true"),
            ("oauth_consumer_key", "xvz1evFS4wEEPTGEFPHBog"),
            ("oauth_nonce", "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg"),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", "1318622958"),
            ("oauth_token", "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb"),
            ("oauth_version", "1.0"),
        ] {
            params.insert(k.to_string(), v.to_string());
        }
        let sig = signature(
            "POST",
            "https://api.twitter.com/1.1/statuses/update.json",
            &params,
            "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
            "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE",
        )
        .unwrap();
        assert_eq!(sig, "hCtSmYh+iHYCEqBWrE7C7hYmtUk=");
    }

    #[test]
    fn test_signature_is_deterministic() {
        let mut params = BTreeMap::new();
        params.insert("method".to_string(), "flickr.test.login".to_string());
        let a = signature("GET", REST_URL, &params, "secret", "token").unwrap();
        let b = signature("GET", REST_URL, &params, "secret", "token").unwrap();
        let c = signature("GET", REST_URL, &params, "secret", "other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_encode_reserved_characters() {
        assert_eq!(encode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(encode("-._~"), "-._~");
    }

    #[test]
    fn test_parse_upload_response() {
        let ok = r#"<?xml version="1.0" encoding="utf-8" ?>
<rsp stat="ok">
<photoid>1234567890</photoid>
</rsp>"#;
        assert_eq!(parse_upload_response(ok).unwrap(), "1234567890");

        let fail = r#"<rsp stat="fail"><err code="5" msg="Filetype was not recognised" /></rsp>"#;
        match parse_upload_response(fail) {
            Err(SyncError::Api(msg)) => assert!(msg.contains("Filetype was not recognised")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_check_stat() {
        let ok = serde_json::json!({"stat": "ok"});
        assert!(check_stat(&ok).is_ok());

        let auth = serde_json::json!({"stat": "fail", "code": 98, "message": "Invalid auth token"});
        assert!(matches!(check_stat(&auth), Err(SyncError::Auth(_))));

        let busy = serde_json::json!({"stat": "fail", "code": 105, "message": "Service currently unavailable"});
        assert!(matches!(check_stat(&busy), Err(SyncError::Network(_))));

        let other = serde_json::json!({"stat": "fail", "code": 1, "message": "Photoset not found"});
        assert!(matches!(check_stat(&other), Err(SyncError::Api(_))));
    }

    #[test]
    fn test_photos_page_is_lenient() {
        let resp: NotInSetResponse = serde_json::from_str(
            r#"{"photos": {"page": "1", "pages": "2", "photo": [
                {"id": "1", "title": "IMG_1", "originalformat": "jpg", "tags": "a checksum:md5=ff"}
            ]}, "stat": "ok"}"#,
        )
        .unwrap();
        let page: Page<Photo> = resp.photos.into();
        assert_eq!((page.page, page.pages), (1, 2));
        assert_eq!(page.items[0].originalformat.as_deref(), Some("jpg"));

        let resp: NotInSetResponse = serde_json::from_str(r#"{"photos": {}}"#).unwrap();
        let page: Page<Photo> = resp.photos.into();
        assert_eq!((page.page, page.pages), (0, 0));
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_photoset_title_content() {
        let resp: PhotosetsResponse = serde_json::from_str(
            r#"{"photosets": {"page": 1, "pages": 1, "photoset": [
                {"id": "721", "title": {"_content": "Holiday"}},
                {"id": "722"}
            ]}}"#,
        )
        .unwrap();
        let sets: Vec<Photoset> = resp.photosets.photoset.into_iter().map(Photoset::from).collect();
        assert_eq!(sets[0].title, "Holiday");
        assert_eq!(sets[1].title, "");
    }

    #[test]
    fn test_login_keeps_transient_errors() {
        assert!(matches!(
            login_error(SyncError::Network("timeout".to_string())),
            SyncError::Network(_)
        ));
        assert!(login_error(SyncError::Network("timeout".to_string())).is_transient());
        assert!(matches!(
            login_error(SyncError::Auth("Invalid auth token".to_string())),
            SyncError::Auth(_)
        ));
        assert!(matches!(
            login_error(SyncError::Api("bad response".to_string())),
            SyncError::Auth(_)
        ));
    }
}
