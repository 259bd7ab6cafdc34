use serde::{Deserialize, Serialize};

use wms_core::{DomainError, DomainResult, Entity, ProductId, ValueObject};

/// EAN-8 / EAN-13 barcode with a verified check digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ean(String);

impl Ean {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let raw = raw.trim();
        if raw.len() != 8 && raw.len() != 13 {
            return Err(DomainError::validation("EAN must have 8 or 13 digits"));
        }
        let digits: Vec<u32> = raw
            .chars()
            .map(|c| c.to_digit(10))
            .collect::<Option<_>>()
            .ok_or_else(|| DomainError::validation("EAN must be numeric"))?;

        let (body, check) = digits.split_at(digits.len() - 1);
        // Weights alternate 3,1,3,... starting from the digit next to the check digit.
        let sum: u32 = body
            .iter()
            .rev()
            .enumerate()
            .map(|(i, d)| if i % 2 == 0 { d * 3 } else { *d })
            .sum();
        let expected = (10 - sum % 10) % 10;
        if check[0] != expected {
            return Err(DomainError::validation("EAN check digit mismatch"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Ean {}

impl TryFrom<String> for Ean {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ean> for String {
    fn from(value: Ean) -> Self {
        value.0
    }
}

/// A stock-keeping product. Deactivated instead of deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    sku: String,
    ean: Option<Ean>,
    name: String,
    active: bool,
}

impl Product {
    pub fn new(id: ProductId, sku: impl Into<String>, name: impl Into<String>) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();
        if sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(Self {
            id,
            sku,
            ean: None,
            name,
            active: true,
        })
    }

    pub fn with_ean(mut self, ean: Ean) -> Self {
        self.ean = Some(ean);
        self
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn ean(&self) -> Option<&Ean> {
        self.ean.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn activate(&mut self) {
        self.active = true;
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
