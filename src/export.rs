use crate::contact::Contact;
use crate::ExportError;
use chrono::{NaiveDate, Utc};
use csv_async::AsyncWriterBuilder;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Column order of exported files.
pub const EXPORT_COLUMNS: [&str; 10] = [
    "name", "company", "email", "phone", "address", "city", "state", "country", "zip", "balance",
];

/// Platform share/export facility receiving a finished document.
pub trait ShareSink: Send + Sync {
    fn share<'a>(
        &'a self,
        file_name: &'a str,
        contents: &'a str,
    ) -> BoxFuture<'a, Result<(), ExportError>>;
}

/// Writes shared documents into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, file_name: &str, contents: &str) -> Result<(), ExportError> {
        fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(file_name);
        let tmp = self.dir.join(format!(".{file_name}.partial"));
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &target).await?;
        Ok(())
    }
}

impl ShareSink for DirectorySink {
    fn share<'a>(
        &'a self,
        file_name: &'a str,
        contents: &'a str,
    ) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(self.write(file_name, contents))
    }
}

/// Render contacts as CSV with [`EXPORT_COLUMNS`].
pub async fn export_csv(contacts: &[Contact]) -> Result<String, ExportError> {
    let mut buf: Vec<u8> = Vec::new();
    {
        let mut wtr = AsyncWriterBuilder::new().create_writer(&mut buf);
        wtr.write_record(EXPORT_COLUMNS).await?;
        for c in contacts {
            wtr.write_record([
                c.name.as_str(),
                c.company.as_str(),
                c.email.as_str(),
                c.phone.as_str(),
                c.address.as_str(),
                c.city.as_str(),
                c.state.as_str(),
                c.country.as_str(),
                c.zip.as_str(),
                c.balance.as_deref().unwrap_or_default(),
            ])
            .await?;
        }
        wtr.flush().await?;
    }
    String::from_utf8(buf).map_err(|e| ExportError::Writer(e.to_string()))
}

/// `contacts_<filter>_<YYYY-MM-DD>.csv`, with the filter reduced to a
/// filesystem-safe slug (`all` when empty).
pub fn export_file_name(filter: &str, date: NaiveDate) -> String {
    let mut slug = String::with_capacity(filter.len());
    for ch in filter.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "all" } else { slug };
    format!("contacts_{}_{}.csv", slug, date.format("%Y-%m-%d"))
}

/// Export `contacts` and hand the document to `sink`. Returns the file name.
pub async fn export_contacts(
    sink: &dyn ShareSink,
    filter: &str,
    contacts: &[Contact],
) -> Result<String, ExportError> {
    let file_name = export_file_name(filter, Utc::now().date_naive());
    let document = export_csv(contacts).await?;
    sink.share(&file_name, &document).await?;
    info!(file = %file_name, contacts = contacts.len(), "exported contacts");
    Ok(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::normalize;
    use crate::parse::parse;

    const FEED: &str = "Full name,Email,Phone number,Company,Address,City,State,Country,Zip,Balance\n\
                        Ann Lee,ann@x.com,5551234567,Acme,\"500 Market St, Suite 12\",San Francisco,CA,USA,94105,\"$1,250.50\"\n\
                        Bob Ray,bob@x.com,12345,,9 Elm Rd,Lima,,Peru,,\n";

    async fn contacts(raw: &str) -> Vec<Contact> {
        parse(raw).await.unwrap().iter().map(normalize).collect()
    }

    #[tokio::test]
    async fn header_and_quoting() {
        let raw = "Name,Email,Company,Address\nAnn,ann@x.com,Acme,\"1 Main St, Apt 2\"\n";
        let csv = export_csv(&contacts(raw).await).await.unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("name,company,email,phone,address,city,state,country,zip,balance")
        );
        assert_eq!(lines.next(), Some("Ann,Acme,ann@x.com,,\"1 Main St, Apt 2\",,,,,"));
    }

    #[tokio::test]
    async fn export_then_reparse_round_trips() {
        let original = contacts(FEED).await;
        assert_eq!(original.len(), 2);
        assert_eq!(original[0].balance.as_deref(), Some("1250.50"));

        let csv = export_csv(&original).await.unwrap();
        let reparsed = contacts(&csv).await;
        assert_eq!(reparsed, original);
    }

    #[tokio::test]
    async fn round_trip_keeps_every_canonical_field() {
        let raw = "Name,Email,Phone,Company,Address,City,State,Country,Zip,Balance\n\
                   Cy Young,cy@x.com,(555) 010-2030,Young & Co,\"4 \"\"Old\"\" Mill\",Oslo,Viken,Norway,0150,12.5\n\
                   Di Ross,di@x.com,+47 22 00 00 00,,,Bergen,,Norway,,\n";
        let original = contacts(raw).await;
        assert_eq!(original.len(), 2);
        let reparsed = contacts(&export_csv(&original).await.unwrap()).await;
        assert_eq!(reparsed, original);
        assert_eq!(reparsed[0].address, "4 \"Old\" Mill");
        assert_eq!(reparsed[0].balance.as_deref(), Some("12.5"));
    }

    #[tokio::test]
    async fn single_field_contacts_do_not_survive_reingestion() {
        let list = contacts("Name,Notes\nAnn Lee,vip\n").await;
        assert_eq!(list.len(), 1);
        let csv = export_csv(&list).await.unwrap();
        assert_eq!(csv.lines().last(), Some("Ann Lee,,,,,,,,,"));
        assert!(matches!(parse(&csv).await, Err(crate::ParseError::Exhausted(_))));
    }

    #[test]
    fn file_names() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(export_file_name("", date), "contacts_all_2024-03-09.csv");
        assert_eq!(
            export_file_name("  New York / NY ", date),
            "contacts_new-york-ny_2024-03-09.csv"
        );
        assert_eq!(export_file_name("Acme", date), "contacts_acme_2024-03-09.csv");
    }

    #[tokio::test]
    async fn directory_sink_receives_document() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("exports"));
        let list = contacts("Name,Email\nAnn Lee,ann@x.com\n").await;

        let name = export_contacts(&sink, "vip", &list).await.unwrap();
        assert!(name.starts_with("contacts_vip_"));
        let written = std::fs::read_to_string(sink.dir().join(&name)).unwrap();
        assert!(written.contains("Ann Lee,,ann@x.com"));
    }
}
