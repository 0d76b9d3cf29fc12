//! Bucket client: credential validation, provider dispatch and ignore rules.
//!
//! The reconciler asks a [`ProviderFactory`] for a [`BucketProvider`]; the
//! default factory maps `spec.provider` onto a concrete client. Only the
//! generic S3 protocol is implemented, new providers slot in as new match
//! arms in [`DefaultProviderFactory`].

pub mod ignore;
pub mod s3;
mod sigv4;

use tracing::debug;

use crate::api::{Bucket, GENERIC_PROVIDER};
use crate::contract::{BucketProvider, Credentials, ProviderFactory, Secret};
use crate::error::Error;

pub const ACCESS_KEY_FIELD: &str = "accesskey";
pub const SECRET_KEY_FIELD: &str = "secretkey";

/// Extract static credentials from secret data. No network I/O.
pub fn validate_credentials(secret: &Secret) -> Result<Credentials, Error> {
    let field = |name: &str| {
        secret
            .data
            .get(name)
            .filter(|v| !v.is_empty())
            .map(|v| String::from_utf8_lossy(v).into_owned())
    };
    match (field(ACCESS_KEY_FIELD), field(SECRET_KEY_FIELD)) {
        (Some(access_key), Some(secret_key)) => Ok(Credentials {
            access_key,
            secret_key,
        }),
        _ => Err(Error::Credential {
            secret: secret.name.clone(),
        }),
    }
}

/// Production [`ProviderFactory`].
#[derive(Debug, Default, Clone)]
pub struct DefaultProviderFactory;

impl ProviderFactory for DefaultProviderFactory {
    fn new_provider(
        &self,
        obj: &Bucket,
        credentials: Option<Credentials>,
    ) -> Result<Box<dyn BucketProvider>, Error> {
        debug!(bucket = %obj.key(), provider = %obj.spec.provider, "Constructing bucket provider");
        match obj.spec.provider.as_str() {
            GENERIC_PROVIDER => Ok(Box::new(s3::GenericS3Provider::new(&obj.spec, credentials)?)),
            other => Err(Error::Configuration(format!("unsupported bucket provider {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BucketSpec;
    use std::collections::BTreeMap;

    fn secret(fields: &[(&str, &str)]) -> Secret {
        Secret {
            name: "dummy".into(),
            data: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn valid_secret_yields_credentials() {
        let creds = validate_credentials(&secret(&[("accesskey", "key"), ("secretkey", "secret")])).unwrap();
        assert_eq!(creds.access_key, "key");
        assert_eq!(creds.secret_key, "secret");
    }

    #[test]
    fn missing_fields_are_credential_errors() {
        for fields in [
            vec![],
            vec![("accesskey", "key")],
            vec![("secretkey", "secret")],
            vec![("accesskey", ""), ("secretkey", "secret")],
        ] {
            let err = validate_credentials(&secret(&fields)).unwrap_err();
            assert!(matches!(err, Error::Credential { ref secret } if secret == "dummy"), "got {err:?}");
        }
    }

    #[test]
    fn debug_output_redacts_secret_key() {
        let creds = Credentials {
            access_key: "key".into(),
            secret_key: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn unknown_provider_is_a_configuration_error() {
        let obj = Bucket::new(
            "demo",
            BucketSpec {
                provider: "gcp".into(),
                bucket_name: "demo".into(),
                endpoint: "storage.example.com".into(),
                ..BucketSpec::default()
            },
        );
        let err = DefaultProviderFactory.new_provider(&obj, None).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)), "got {err:?}");
    }

    #[test]
    fn generic_provider_is_constructed() {
        let obj = Bucket::new(
            "demo",
            BucketSpec {
                bucket_name: "demo".into(),
                endpoint: "localhost:9000".into(),
                insecure: true,
                ..BucketSpec::default()
            },
        );
        assert!(DefaultProviderFactory.new_provider(&obj, None).is_ok());
    }
}
