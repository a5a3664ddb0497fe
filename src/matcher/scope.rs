//! Byte regions scanned by pattern greps

use crate::entrypoint::{
    BodyParamFinder, CookieFinder, Finder, JsonParamFinder, MultipartFinder, QueryParamFinder,
    XmlParamFinder,
};
use crate::http::{Request, Response};
use crate::profile::{GrepOptions, RequestScope};

/// A scanned blob and the absolute offset of its first byte
pub(crate) struct Scoped {
    pub bytes: Vec<u8>,
    pub offset: usize,
}

pub(crate) fn response_scope(response: &Response, options: &GrepOptions) -> Scoped {
    if options.only_in_headers {
        Scoped {
            bytes: response.head_bytes(),
            offset: 0,
        }
    } else if options.excluding_headers {
        Scoped {
            bytes: response.body.clone(),
            offset: response.head_bytes().len(),
        }
    } else {
        Scoped {
            bytes: response.to_bytes(),
            offset: 0,
        }
    }
}

pub(crate) fn request_scope(request: &Request, scope: &RequestScope) -> Scoped {
    let bytes = match scope {
        RequestScope::All => request.to_bytes(),
        RequestScope::UrlFolder => {
            let path = request.path_only();
            let end = path.rfind('/').map_or(0, |i| i + 1);
            path[..end].as_bytes().to_vec()
        }
        RequestScope::UrlFile => {
            let path = request.path_only();
            let start = path.rfind('/').map_or(0, |i| i + 1);
            path[start..].as_bytes().to_vec()
        }
        RequestScope::ParamNames => param_region(request, true),
        RequestScope::ParamValues => param_region(request, false),
        RequestScope::EntireBody => request.body.clone(),
        RequestScope::Header(name) => request
            .header_values(name)
            .map(|values| values.join("\n"))
            .unwrap_or_default()
            .into_bytes(),
    };
    Scoped { bytes, offset: 0 }
}

/// Parameter names or values of every parameter family, one per line
fn param_region(request: &Request, names: bool) -> Vec<u8> {
    let finders: [&dyn Finder; 6] = [
        &QueryParamFinder,
        &BodyParamFinder,
        &CookieFinder,
        &JsonParamFinder,
        &XmlParamFinder,
        &MultipartFinder,
    ];
    finders
        .iter()
        .flat_map(|f| f.find(request))
        .filter(|e| e.kind().is_name() == names)
        .map(|e| e.value().to_string())
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}
