//! 远程照片服务后端
//!
//! 相册对应文件夹，不属于任何相册的照片对应根文件夹。所有远程调用都经过
//! [`RetryPolicy`]。列表按页惰性获取，取到一页就产出一页；见过的照片和
//! 相册缓存在后端实例里，整个运行期间不失效。

pub mod api;
pub mod auth;
pub mod client;

use super::{filter_files, filter_folders, listing_of, Backend, FileInfo, FolderInfo, Listing};
use crate::config::{AppConfig, Filters};
use crate::core::checksum::{decode_checksum, encode_tags};
use crate::core::retry::RetryPolicy;
use crate::error::{Result, SyncError};
use api::{Page, Photo, PhotoApi, Photoset, UploadRequest, User};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// 分页上限，防止服务端返回异常的总页数导致死循环
pub const MAX_PAGES: u32 = 1000;

/// 上传时附带的标签和可见性
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub tags: String,
    pub is_public: bool,
    pub is_friend: bool,
    pub is_family: bool,
}

impl UploadOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tags: config.tags.clone(),
            is_public: config.is_public,
            is_friend: config.is_friend,
            is_family: config.is_family,
        }
    }
}

pub struct FlickrBackend<A: PhotoApi> {
    api: A,
    filters: Filters,
    options: UploadOptions,
    retry: RetryPolicy,
    user: OnceCell<User>,
    /// 全部相册（未过滤），首次使用时加载
    photosets: RwLock<Option<Vec<Photoset>>>,
    /// 列表时见过的照片，下载时按 id 取回
    photos: RwLock<HashMap<String, Photo>>,
}

/// 照片显示名：标题（为空时用 id），有原始格式时加扩展名
fn photo_name(photo: &Photo) -> String {
    let base = if photo.title.is_empty() {
        photo.id.as_str()
    } else {
        photo.title.as_str()
    };
    match photo.originalformat.as_deref() {
        Some(ext) if !ext.is_empty() => format!("{}.{}", base, ext),
        _ => base.to_string(),
    }
}

impl<A: PhotoApi> FlickrBackend<A> {
    pub fn new(api: A, filters: Filters, options: UploadOptions, retry: RetryPolicy) -> Self {
        Self {
            api,
            filters,
            options,
            retry,
            user: OnceCell::new(),
            photosets: RwLock::new(None),
            photos: RwLock::new(HashMap::new()),
        }
    }

    /// 第一次调用时登录，之后复用
    async fn user(&self) -> Result<&User> {
        self.user
            .get_or_try_init(|| async {
                let user = self.retry.call("login", || self.api.login()).await?;
                info!("已登录: {}", user.username);
                Ok::<_, SyncError>(user)
            })
            .await
    }

    /// 逐页获取直到 `page >= pages`，最多 [`MAX_PAGES`] 页
    ///
    /// 每页在被消费时才请求，第一页之前先确保已登录。
    fn pages<'a, T, F, Fut>(&'a self, op: &'static str, fetch: F) -> Listing<'a, T>
    where
        T: Send + 'a,
        F: Fn(&'a User, u32) -> Fut + Clone + Send + Sync + 'a,
        Fut: Future<Output = Result<Page<T>>> + Send + 'a,
    {
        stream::try_unfold(Some(1u32), move |next| {
            let fetch = fetch.clone();
            async move {
                let Some(page) = next else {
                    return Ok::<_, SyncError>(None);
                };
                let user = self.user().await?;
                let result = self.retry.call(op, || fetch(user, page)).await?;
                debug!("{}: 第 {}/{} 页, {} 项", op, result.page, result.pages, result.items.len());

                let next = if result.page >= result.pages {
                    None
                } else if page >= MAX_PAGES {
                    warn!("{}: 已达到分页上限 {}，停止获取", op, MAX_PAGES);
                    None
                } else {
                    Some(page + 1)
                };
                let items = stream::iter(result.items.into_iter().map(Ok::<T, SyncError>));
                Ok::<_, SyncError>(Some((items, next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    fn photoset_pages(&self) -> Listing<'_, Photoset> {
        self.pages("flickr.photosets.getList", move |user, page| {
            self.api.photosets(user, page)
        })
    }

    async fn all_photosets(&self) -> Result<Vec<Photoset>> {
        if let Some(sets) = self.photosets.read().await.as_ref() {
            return Ok(sets.clone());
        }

        let sets: Vec<Photoset> = self.photoset_pages().try_collect().await?;
        *self.photosets.write().await = Some(sets.clone());
        Ok(sets)
    }

    /// 按标题查找相册（大小写不敏感）
    async fn find_photoset(&self, title: &str) -> Result<Option<Photoset>> {
        let wanted = title.to_lowercase();
        Ok(self
            .all_photosets()
            .await?
            .into_iter()
            .find(|set| set.title.to_lowercase() == wanted))
    }

    /// 把刚上传的照片放进相册，相册不存在时用它作为封面创建
    async fn add_to_photoset(&self, title: &str, photo_id: &str) -> Result<()> {
        match self.find_photoset(title).await? {
            Some(set) => {
                self.retry
                    .call("flickr.photosets.addPhoto", || {
                        self.api.add_photo(&set.id, photo_id)
                    })
                    .await
            }
            None => {
                let set = self
                    .retry
                    .call("flickr.photosets.create", || {
                        self.api.create_photoset(title, photo_id)
                    })
                    .await?;
                info!("已创建相册: {} ({})", set.title, set.id);
                if let Some(sets) = self.photosets.write().await.as_mut() {
                    sets.push(set);
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<A: PhotoApi> Backend for FlickrBackend<A> {
    fn list_folders(&self) -> Listing<'_, FolderInfo> {
        let folders = stream::once(async move { self.photosets.read().await.clone() })
            .flat_map(move |cached| match cached {
                Some(sets) => listing_of(sets),
                None => self.photoset_pages(),
            })
            .map_ok(|set| FolderInfo::new(set.id, set.title))
            .boxed();
        filter_folders(folders, &self.filters.folders)
    }

    fn list_files<'a>(&'a self, folder: Option<&'a FolderInfo>) -> Listing<'a, FileInfo> {
        let photos = match folder.filter(|f| !f.is_root()) {
            Some(folder) => {
                let id = folder.id.as_str();
                self.pages("flickr.photosets.getPhotos", move |_, page| {
                    self.api.photoset_photos(id, page)
                })
            }
            None => self.pages("flickr.photos.getNotInSet", move |_, page| {
                self.api.photos_not_in_set(page)
            }),
        };

        let files = photos
            .and_then(move |photo| async move {
                let mut file = FileInfo::new(photo.id.clone(), photo_name(&photo));
                file.checksum = decode_checksum(photo.tags.split_whitespace());
                self.photos.write().await.insert(photo.id.clone(), photo);
                Ok(file)
            })
            .boxed();
        filter_files(files, &self.filters.files)
    }

    async fn download(&self, file: &FileInfo, dest: &Path) -> Result<()> {
        let photo = self
            .photos
            .read()
            .await
            .get(&file.id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("照片 {} ({})", file.name, file.id)))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.retry
            .call("download", || self.api.download(&photo, dest))
            .await
    }

    async fn upload(
        &self,
        src: &Path,
        folder_name: Option<&str>,
        file_name: &str,
        checksum: Option<&str>,
    ) -> Result<()> {
        self.user().await?;

        let title = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string();
        let request = UploadRequest {
            title,
            tags: encode_tags(&self.options.tags, checksum),
            is_public: self.options.is_public,
            is_friend: self.options.is_friend,
            is_family: self.options.is_family,
        };

        let photo_id = self
            .retry
            .call("upload", || self.api.upload(src, &request))
            .await?;
        debug!("已上传 {} -> {}", file_name, photo_id);

        if let Some(folder) = folder_name {
            self.add_to_photoset(folder, &photo_id).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "flickr"
    }
}
