use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use url::Url;

use crate::config::AppConfig;
use crate::infra::ObjectStore;

#[derive(Clone)]
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
    public_base: Url,
}

impl S3ObjectStorage {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let endpoint = config
            .s3_endpoint
            .clone()
            .ok_or_else(|| anyhow!("missing required env var: S3_ENDPOINT"))?;
        let bucket = config
            .s3_bucket
            .clone()
            .ok_or_else(|| anyhow!("missing required env var: S3_BUCKET"))?;

        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .endpoint_url(endpoint.clone())
            .force_path_style(true);
        if let Some(provider) = shared_config.credentials_provider() {
            s3_builder = s3_builder.credentials_provider(provider);
        }
        let client = Client::from_conf(s3_builder.build());

        let public_base = public_base_url(
            config.s3_public_endpoint.as_deref().unwrap_or(&endpoint),
            &bucket,
        )?;

        Ok(Self {
            client,
            bucket,
            public_base,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStorage {
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| anyhow!("put_object {} failed: {}", key, err))?;

        tracing::debug!(bucket = %self.bucket, key = %key, size_bytes = size, "object stored");
        Ok(self.download_url(key))
    }

    fn download_url(&self, key: &str) -> String {
        object_url(&self.public_base, key)
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| anyhow!("head_bucket failed: {}", err))?;
        Ok(())
    }
}

/// Path-style base, `{endpoint}/{bucket}/`, accepting endpoints without a scheme.
fn public_base_url(endpoint: &str, bucket: &str) -> Result<Url> {
    let endpoint = if endpoint.contains("://") {
        Url::parse(endpoint)?
    } else {
        Url::parse(&format!("http://{}", endpoint))?
    };

    let base = format!("{}/{}/", endpoint.as_str().trim_end_matches('/'), bucket);
    Ok(Url::parse(&base)?)
}

fn object_url(base: &Url, key: &str) -> String {
    match base.join(key.trim_start_matches('/')) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{}{}", base, key.trim_start_matches('/')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_path_style_urls() {
        let base = public_base_url("localhost:4566", "itshere").unwrap();
        assert_eq!(
            object_url(&base, "posts/p1/a.jpg"),
            "http://localhost:4566/itshere/posts/p1/a.jpg"
        );

        let base = public_base_url("https://cdn.example.com/", "media").unwrap();
        assert_eq!(
            object_url(&base, "/posts/p1/b.png"),
            "https://cdn.example.com/media/posts/p1/b.png"
        );
    }
}
